//! Command lines for the programs that reach a compute node.

use camino::Utf8PathBuf;
use std::fmt;

/// Program and arguments to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Something that can run `command` on `host`.
pub trait Launcher: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn invocation(&self, host: &str, command: &str) -> Invocation;
}

/// Plain ssh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureShell {
    program: Utf8PathBuf,
    pty: bool,
    x11: bool,
    trusted_x11: bool,
    compression: bool,
    relaxed_host_key_check: bool,
    local_only: bool,
}

impl SecureShell {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            pty: false,
            x11: false,
            trusted_x11: false,
            compression: false,
            relaxed_host_key_check: false,
            local_only: false,
        }
    }

    /// Settings for interactive graphical applications.
    pub fn interactive(program: impl Into<Utf8PathBuf>) -> Self {
        Self::new(program)
            .pty(true)
            .trusted_x11(true)
            .compression(true)
            .relaxed_host_key_check(true)
    }

    pub fn pty(mut self, on: bool) -> Self {
        self.pty = on;
        self
    }

    pub fn x11(mut self, on: bool) -> Self {
        self.x11 = on;
        self
    }

    pub fn trusted_x11(mut self, on: bool) -> Self {
        self.trusted_x11 = on;
        self
    }

    pub fn compression(mut self, on: bool) -> Self {
        self.compression = on;
        self
    }

    pub fn relaxed_host_key_check(mut self, on: bool) -> Self {
        self.relaxed_host_key_check = on;
        self
    }

    /// Run commands on this machine instead of the remote host.
    pub fn local_only(mut self, on: bool) -> Self {
        self.local_only = on;
        self
    }

    pub fn is_local_only(&self) -> bool {
        self.local_only
    }

    pub fn program(&self) -> &Utf8PathBuf {
        &self.program
    }

    pub fn flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.pty {
            // double -t forces a tty even without a local one
            flags.extend(["-t", "-t"]);
        }
        if self.x11 {
            flags.push("-X");
        }
        if self.trusted_x11 {
            flags.push("-Y");
        }
        if self.compression {
            flags.push("-C");
        }
        if self.relaxed_host_key_check {
            flags.extend(["-o", "StrictHostKeyChecking=no"]);
        }
        flags
    }
}

impl Launcher for SecureShell {
    fn name(&self) -> &str {
        "ssh"
    }

    fn invocation(&self, host: &str, command: &str) -> Invocation {
        if self.local_only {
            return Invocation::new("bash").arg("-c").arg(command);
        }
        let mut invocation = Invocation::new(self.program.as_str());
        for flag in self.flags() {
            invocation = invocation.arg(flag);
        }
        invocation.arg(host).arg(command)
    }
}

/// ssh through VirtualGL's `vglconnect`, optionally wrapping the command in
/// `vglrun`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsForward {
    vglconnect: Utf8PathBuf,
    vglrun: Option<Utf8PathBuf>,
}

impl GraphicsForward {
    pub fn new(vglconnect: impl Into<Utf8PathBuf>) -> Self {
        Self {
            vglconnect: vglconnect.into(),
            vglrun: None,
        }
    }

    pub fn with_vglrun(mut self, vglrun: impl Into<Utf8PathBuf>) -> Self {
        self.vglrun = Some(vglrun.into());
        self
    }
}

impl Launcher for GraphicsForward {
    fn name(&self) -> &str {
        "vglconnect"
    }

    fn invocation(&self, host: &str, command: &str) -> Invocation {
        let command = match &self.vglrun {
            Some(vglrun) => format!("{vglrun} {command}"),
            None => command.to_string(),
        };
        Invocation::new(self.vglconnect.as_str())
            .arg("-s")
            .arg(host)
            .arg(command)
    }
}

/// FreeRDP client for remote desktop sessions. The command is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopClient {
    program: Utf8PathBuf,
    user: Option<String>,
}

impl DesktopClient {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

impl Launcher for DesktopClient {
    fn name(&self) -> &str {
        "xfreerdp"
    }

    fn invocation(&self, host: &str, _command: &str) -> Invocation {
        let mut invocation = Invocation::new(self.program.as_str()).arg(format!("/v:{host}"));
        if let Some(user) = &self.user {
            invocation = invocation.arg(format!("/u:{user}"));
        }
        invocation
            .arg("/sec:tls")
            .arg("/cert:ignore")
            .arg("+clipboard")
            .arg("/dynamic-resolution")
    }
}

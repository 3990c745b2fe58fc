//! Per-user state directory (`~/.lhpc`).
//!
//! The scheduler side writes job output and VM host files here; the
//! launcher only reads them, apart from its own session history.

use camino::{Utf8Path, Utf8PathBuf};

/// Name of the state directory below the user's home.
pub const STATE_DIR_NAME: &str = ".lhpc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDir {
    root: Utf8PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.lhpc`, falling back to the temp dir when no home is known.
    pub fn for_current_user() -> Self {
        Self::new(home_dir().join(STATE_DIR_NAME))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Output file the batch job writes, with `%j` left for sbatch to fill in.
    pub fn job_output_template(&self) -> Utf8PathBuf {
        self.root.join("lhpcdt-%j.out")
    }

    /// Output file of a submitted job.
    pub fn job_output(&self, job_id: u64) -> Utf8PathBuf {
        self.root.join(format!("lhpcdt-{job_id}.out"))
    }

    /// File holding the host name of an allocated VM.
    pub fn vm_host_file(&self, job_id: u64) -> Utf8PathBuf {
        self.root.join(format!("vm_host_{job_id}.ip"))
    }

    /// Session history written by the launcher.
    pub fn session_history(&self) -> Utf8PathBuf {
        self.root.join("sessions.jsonl")
    }
}

/// The user's home directory.
pub fn home_dir() -> Utf8PathBuf {
    dirs::home_dir()
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
        .or_else(|| Utf8PathBuf::from_path_buf(std::env::temp_dir()).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_files() {
        let dir = StateDir::new("/home/alice/.lhpc");
        assert_eq!(
            dir.job_output(12345),
            Utf8PathBuf::from("/home/alice/.lhpc/lhpcdt-12345.out")
        );
        assert_eq!(
            dir.vm_host_file(12345),
            Utf8PathBuf::from("/home/alice/.lhpc/vm_host_12345.ip")
        );
        assert_eq!(
            dir.job_output_template(),
            Utf8PathBuf::from("/home/alice/.lhpc/lhpcdt-%j.out")
        );
    }

    #[test]
    fn test_for_current_user_ends_with_state_dir() {
        let dir = StateDir::for_current_user();
        assert_eq!(dir.root().file_name(), Some(STATE_DIR_NAME));
    }
}

//! Which projects the current user may charge.

use crate::grantfile::{GrantError, Project, load_grant_dir, load_grant_file};
use crate::sacctmgr::{AccountMap, parse_associations};
use camino::Utf8PathBuf;
use chrono::NaiveDate;
use lhpc_core::LaunchConfig;
use lhpc_slurm::{Reservation, SlurmClient};

/// Login name of the user running the launcher.
pub fn current_user() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .ok()
        .filter(|u| !u.is_empty())
}

/// The one entitlement source a configuration selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementSource {
    AccountManager,
    GrantFile(Utf8PathBuf),
    GrantDir { dir: Utf8PathBuf, suffix: String },
    None,
}

impl EntitlementSource {
    /// `use_sacctmgr` selects the account manager; otherwise an explicit
    /// `grantfile` wins over `grantfile_dir`.
    pub fn from_config(config: &LaunchConfig) -> Self {
        if config.use_sacctmgr {
            EntitlementSource::AccountManager
        } else if let Some(file) = &config.grantfile {
            if config.grantfile_dir.is_some() {
                tracing::debug!("Both grantfile and grantfile_dir set, using {}", file);
            }
            EntitlementSource::GrantFile(file.clone())
        } else if let Some(dir) = &config.grantfile_dir {
            EntitlementSource::GrantDir {
                dir: dir.clone(),
                suffix: config.grantfile_suffix.clone(),
            }
        } else {
            EntitlementSource::None
        }
    }
}

/// A project the user may currently use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveProject {
    pub name: String,
    /// Partitions the project is limited to; empty means any
    pub partitions: Vec<String>,
    pub core_hours: Option<u64>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entitlements {
    pub user: String,
    pub projects: Vec<ActiveProject>,
}

impl Entitlements {
    /// Projects active for `user` on `date`. A project with several active
    /// entries is listed once, from its first entry.
    pub fn from_grants(projects: &[Project], user: &str, date: NaiveDate) -> Self {
        let mut active: Vec<ActiveProject> = Vec::new();
        for p in projects.iter().filter(|p| p.active_for(user, date)) {
            if active.iter().any(|a| a.name == p.name) {
                continue;
            }
            active.push(ActiveProject {
                name: p.name.clone(),
                partitions: vec![p.partition.clone()],
                core_hours: Some(p.core_hours),
                end: Some(p.end),
            });
        }
        let projects = active;
        Self {
            user: user.to_string(),
            projects,
        }
    }

    pub fn from_accounts(accounts: &AccountMap, user: &str) -> Self {
        let projects = accounts
            .iter()
            .filter(|(_, access)| access.members.contains(user))
            .map(|(name, access)| ActiveProject {
                name: name.clone(),
                partitions: access.partitions.iter().cloned().collect(),
                core_hours: None,
                end: None,
            })
            .collect();
        Self {
            user: user.to_string(),
            projects,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.projects.iter().map(|p| p.name.as_str())
    }

    pub fn contains(&self, account: &str) -> bool {
        self.names().any(|name| name == account)
    }

    pub fn default_account(&self) -> Option<&str> {
        self.names().next()
    }

    /// Reservations usable with one of the user's projects.
    pub fn filter_reservations(&self, reservations: &[Reservation]) -> Vec<Reservation> {
        reservations
            .iter()
            .filter(|r| r.accounts.iter().any(|a| self.contains(a)))
            .cloned()
            .collect()
    }
}

/// Resolve the entitlements of `user` on `date` from the configured source.
///
/// Returns `Ok(None)` when no source is configured.
pub async fn resolve(
    source: &EntitlementSource,
    client: &SlurmClient,
    user: &str,
    date: NaiveDate,
) -> Result<Option<Entitlements>, GrantError> {
    let entitlements = match source {
        EntitlementSource::None => return Ok(None),
        EntitlementSource::AccountManager => {
            let stdout = client.account_associations(Some(user)).await?;
            Entitlements::from_accounts(&parse_associations(&stdout), user)
        }
        EntitlementSource::GrantFile(path) => {
            Entitlements::from_grants(&load_grant_file(path).await?, user, date)
        }
        EntitlementSource::GrantDir { dir, suffix } => {
            Entitlements::from_grants(&load_grant_dir(dir, suffix).await?, user, date)
        }
    };

    if entitlements.is_empty() {
        tracing::warn!("No active project found for {}", user);
    } else {
        tracing::debug!(
            "Active projects for {}: {}",
            user,
            entitlements.names().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(Some(entitlements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grantfile::parse_grant_file;
    use lhpc_core::StateDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y%m%d").unwrap()
    }

    fn reservation(name: &str, accounts: &[&str]) -> Reservation {
        Reservation {
            name: name.to_string(),
            accounts: accounts.iter().map(|a| a.to_string()).collect(),
            users: Vec::new(),
            state: "ACTIVE".to_string(),
            nodes: Vec::new(),
            start: None,
            end: None,
        }
    }

    #[test]
    fn test_source_precedence() {
        let mut config = LaunchConfig {
            grantfile: Some("/sw/grants/lunarc.grant".into()),
            grantfile_dir: Some("/sw/grants".into()),
            ..Default::default()
        };
        assert_eq!(
            EntitlementSource::from_config(&config),
            EntitlementSource::GrantFile("/sw/grants/lunarc.grant".into())
        );

        config.grantfile = None;
        assert_eq!(
            EntitlementSource::from_config(&config),
            EntitlementSource::GrantDir {
                dir: "/sw/grants".into(),
                suffix: ".grant".to_string()
            }
        );

        config.use_sacctmgr = true;
        assert_eq!(
            EntitlementSource::from_config(&config),
            EntitlementSource::AccountManager
        );

        assert_eq!(
            EntitlementSource::from_config(&LaunchConfig::default()),
            EntitlementSource::None
        );
    }

    #[test]
    fn test_entitlements_from_grants() {
        let projects = parse_grant_file(
            "lu2024-2-1,20240101,20250101,50000,lu32,alice#alice bob\n\
             lu2023-2-9,20230101,20240101,10000,lu32,dave#alice\n",
        );
        let entitlements = Entitlements::from_grants(&projects, "alice", date("20240615"));
        assert_eq!(entitlements.names().collect::<Vec<_>>(), vec!["lu2024-2-1"]);
        assert_eq!(entitlements.default_account(), Some("lu2024-2-1"));
        assert_eq!(entitlements.projects[0].partitions, vec!["lu32"]);

        let reservations = vec![
            reservation("course", &["lu2024-2-1"]),
            reservation("other", &["lu2023-2-9"]),
            reservation("open", &[]),
        ];
        let usable = entitlements.filter_reservations(&reservations);
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].name, "course");

        let nobody = Entitlements::from_grants(&projects, "mallory", date("20240615"));
        assert!(nobody.is_empty());
        assert!(nobody.filter_reservations(&reservations).is_empty());
    }

    #[tokio::test]
    async fn test_resolve_renewed_project_from_grant_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("2023.grant"), "p1,20230101,20240101,1,lu32,x#alice\n").unwrap();
        std::fs::write(
            root.join("2024.grant"),
            "p1,20240101,20990101,1,lu32,x#alice bob\n\
             p1,20240101,20990101,1,lu32,x#alice bob\n",
        )
        .unwrap();

        let client = SlurmClient::new(StateDir::new(root.clone()));
        let source = EntitlementSource::GrantDir {
            dir: root,
            suffix: ".grant".to_string(),
        };
        let entitlements = resolve(&source, &client, "bob", date("20250101"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entitlements.names().collect::<Vec<_>>(), vec!["p1"]);
    }

    #[tokio::test]
    async fn test_resolve_from_grant_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let path = root.join("site.grant");
        std::fs::write(&path, "lu2024-2-1,20240101,20250101,50000,lu32,alice#alice\n").unwrap();

        let client = SlurmClient::new(StateDir::new(root.clone()));
        let source = EntitlementSource::GrantFile(path);
        let entitlements = resolve(&source, &client, "alice", date("20240301"))
            .await
            .unwrap()
            .unwrap();
        assert!(entitlements.contains("lu2024-2-1"));

        let none = resolve(&EntitlementSource::None, &client, "alice", date("20240301"))
            .await
            .unwrap();
        assert!(none.is_none());
    }
}

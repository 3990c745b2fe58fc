//! Entitlements from `sacctmgr -P show user` output.

use std::collections::{BTreeMap, BTreeSet};

/// Who may use an account, and where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountAccess {
    pub partitions: BTreeSet<String>,
    pub members: BTreeSet<String>,
}

/// Accounts keyed by name.
pub type AccountMap = BTreeMap<String, AccountAccess>;

/// Parse pipe separated sacctmgr output.
///
/// Columns are located through the header, so both the plain listing
/// (`User|Def Acct|Admin`) and the association listing (with `Account`
/// and `Partition`) are understood. An empty partition means all.
pub fn parse_associations(stdout: &str) -> AccountMap {
    let mut lines = stdout.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return AccountMap::new();
    };
    let columns: Vec<&str> = header.split('|').map(str::trim).collect();
    let position = |name: &str| columns.iter().position(|c| *c == name);

    let Some(user_col) = position("User") else {
        tracing::warn!("sacctmgr output has no User column: {}", header);
        return AccountMap::new();
    };
    let Some(account_col) = position("Account").or_else(|| position("Def Acct")) else {
        tracing::warn!("sacctmgr output has no account column: {}", header);
        return AccountMap::new();
    };
    let partition_col = position("Partition");

    let mut accounts = AccountMap::new();
    for line in lines {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        let (Some(user), Some(account)) = (fields.get(user_col), fields.get(account_col)) else {
            tracing::warn!("Skipping short sacctmgr line: {}", line);
            continue;
        };
        if account.is_empty() {
            continue;
        }

        let access = accounts.entry(account.to_string()).or_default();
        if !user.is_empty() {
            access.members.insert(user.to_string());
        }
        if let Some(partition) = partition_col.and_then(|i| fields.get(i)) {
            if !partition.is_empty() {
                access.partitions.insert(partition.to_string());
            }
        }
    }
    accounts
}

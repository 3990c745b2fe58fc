//! Parsing of scontrol style `Key=Value` descriptions.

use std::collections::HashMap;

/// Parse whitespace separated `Key=Value` tokens into a map.
///
/// Only the first `=` in a token separates key and value, so values like
/// `TRES=cpu=4,mem=8G` survive. Tokens without `=` continue the previous
/// value (scontrol prints e.g. `Reason=Not responding [root@...]`).
pub fn parse_key_values(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut last_key: Option<String> = None;

    for token in text.split_whitespace() {
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                map.insert(key.to_string(), value.to_string());
                last_key = Some(key.to_string());
            }
            _ => {
                if let Some(value) = last_key.as_ref().and_then(|k| map.get_mut(k)) {
                    value.push(' ');
                    value.push_str(token);
                }
            }
        }
    }

    map
}

/// Split a multi-record scontrol listing into one map per record.
///
/// A new record starts whenever `leading_key` appears, which covers both the
/// one-line (`-o`) form and the multi-line form.
pub fn parse_records(text: &str, leading_key: &str) -> Vec<HashMap<String, String>> {
    let mut records = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;
    let mut last_key: Option<String> = None;

    for token in text.split_whitespace() {
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                if key == leading_key {
                    if let Some(done) = current.take() {
                        records.push(done);
                    }
                    current = Some(HashMap::new());
                }
                if let Some(record) = current.as_mut() {
                    record.insert(key.to_string(), value.to_string());
                    last_key = Some(key.to_string());
                }
            }
            _ => {
                if let (Some(record), Some(key)) = (current.as_mut(), last_key.as_ref()) {
                    if let Some(value) = record.get_mut(key) {
                        value.push(' ');
                        value.push_str(token);
                    }
                }
            }
        }
    }

    if let Some(done) = current {
        records.push(done);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_values() {
        let map = parse_key_values("NodeName=cn01 Arch=x86_64 CPUTot=32 TRES=cpu=32,mem=128G");
        assert_eq!(map.get("NodeName").map(String::as_str), Some("cn01"));
        assert_eq!(map.get("CPUTot").map(String::as_str), Some("32"));
        assert_eq!(map.get("TRES").map(String::as_str), Some("cpu=32,mem=128G"));
    }

    #[test]
    fn test_continuation_tokens() {
        let map = parse_key_values("State=DOWN Reason=Not responding [root@2024-01-01]");
        assert_eq!(
            map.get("Reason").map(String::as_str),
            Some("Not responding [root@2024-01-01]")
        );
    }

    #[test]
    fn test_parse_records_one_line_form() {
        let text = "NodeName=cn01 State=IDLE\nNodeName=cn02 State=MIXED\n";
        let records = parse_records(text, "NodeName");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("State").map(String::as_str), Some("MIXED"));
    }

    #[test]
    fn test_parse_records_multi_line_form() {
        let text = "ReservationName=course StartTime=2024-05-01T08:00:00\n   Nodes=cn[01-02] Accounts=lu2024-7-1\n\nReservationName=maint StartTime=2024-06-01T00:00:00\n   Nodes=ALL\n";
        let records = parse_records(text, "ReservationName");
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].get("Accounts").map(String::as_str),
            Some("lu2024-7-1")
        );
        assert_eq!(records[1].get("Nodes").map(String::as_str), Some("ALL"));
    }

    #[test]
    fn test_parse_records_ignores_preamble() {
        let records = parse_records("No reservations in the system", "ReservationName");
        assert!(records.is_empty());
    }
}

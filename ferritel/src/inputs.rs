//! Input list parsing: targets, credentials and commands.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use indexmap::{IndexMap, IndexSet};
use log::debug;
use regex::Regex;

use crate::config::Target;

/// Suffix of per-device command files: `<address>_autodeploy.txt`.
pub const AUTODEPLOY_SUFFIX: &str = "_autodeploy.txt";

static IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[0-9]{1,3}\.){3}[0-9]{1,3}").expect("static IPv4 pattern is valid")
});

/// Split a comma list, trimming entries and dropping empty ones.
///
/// Used for inline target lists.
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a comma list of usernames or passwords.
///
/// Entries are kept verbatim; surrounding spaces may be part of a password.
pub fn split_credentials(text: &str) -> Vec<String> {
    text.split(',').map(str::to_string).collect()
}

/// Split an inline command string on commas.
///
/// `"show clock, show users"` gives two commands.
pub fn split_commands(text: &str) -> Vec<String> {
    split_list(text)
}

/// Parse a target file.
///
/// Blank lines and lines starting with `!` or `#` are skipped. Every IPv4
/// address on a line is taken except netmasks (`255.x.x.x`); a line without
/// any contributes its first token as a hostname. Duplicates are dropped,
/// first occurrence kept.
pub fn parse_target_list(text: &str) -> Vec<Target> {
    let mut targets = IndexSet::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('!') || line.starts_with('#') {
            continue;
        }

        let mut found = false;
        for m in IPV4.find_iter(line) {
            found = true;
            if !m.as_str().starts_with("255.") {
                targets.insert(m.as_str().to_string());
            }
        }

        if !found {
            if let Some(host) = line.split_whitespace().next() {
                targets.insert(host.to_string());
            }
        }
    }

    targets.into_iter().map(Target::from).collect()
}

/// Parse a command file: one command per line, trailing whitespace
/// trimmed, blank lines skipped.
pub fn parse_command_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Read and parse a target file.
pub async fn load_target_list(path: impl AsRef<Path>) -> io::Result<Vec<Target>> {
    Ok(parse_target_list(&read_text(path.as_ref()).await?))
}

/// Read and parse a command file.
pub async fn load_command_list(path: impl AsRef<Path>) -> io::Result<Vec<String>> {
    Ok(parse_command_list(&read_text(path.as_ref()).await?))
}

/// Path of the per-device command file for `target` under `directory`.
pub fn autodeploy_path(directory: impl AsRef<Path>, target: &Target) -> PathBuf {
    directory
        .as_ref()
        .join(format!("{}{}", target.address(), AUTODEPLOY_SUFFIX))
}

/// Load the per-device command file of every target that has one.
///
/// Targets without a file are left out of the map. Read errors other than
/// a missing file are returned.
pub async fn load_autodeploy(
    directory: impl AsRef<Path>,
    targets: &[Target],
) -> io::Result<IndexMap<Target, Vec<String>>> {
    let mut lists = IndexMap::with_capacity(targets.len());

    for target in targets {
        let path = autodeploy_path(directory.as_ref(), target);
        match load_command_list(&path).await {
            Ok(commands) => {
                lists.insert(target.clone(), commands);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{}: no command file at {}", target, path.display());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(lists)
}

async fn read_text(path: &Path) -> io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list("10.0.0.1, 10.0.0.2,,r3 "),
            vec!["10.0.0.1", "10.0.0.2", "r3"]
        );
    }

    #[test]
    fn test_split_credentials_keeps_spaces() {
        assert_eq!(split_credentials("pw1, pw 2"), vec!["pw1", " pw 2"]);
    }

    #[test]
    fn test_split_commands() {
        assert_eq!(
            split_commands("show clock,show ip int brief"),
            vec!["show clock", "show ip int brief"]
        );
    }

    #[test]
    fn test_parse_target_list() {
        let text = "\
! core switches
# comment
10.0.0.1
interface Vlan10 ip address 10.0.10.1 255.255.255.0

10.0.0.1
edge-rtr.example.net  lab
";
        let targets = parse_target_list(text);
        let addresses: Vec<&str> = targets.iter().map(Target::address).collect();
        assert_eq!(
            addresses,
            vec!["10.0.0.1", "10.0.10.1", "edge-rtr.example.net"]
        );
    }

    #[test]
    fn test_parse_command_list() {
        let text = "show clock  \r\n\r\n  show users\n   \n";
        assert_eq!(parse_command_list(text), vec!["show clock", "  show users"]);
    }

    #[test]
    fn test_autodeploy_path() {
        assert_eq!(
            autodeploy_path("cfg", &Target::new("10.0.0.1")),
            PathBuf::from("cfg/10.0.0.1_autodeploy.txt")
        );
    }

    #[tokio::test]
    async fn test_load_autodeploy_skips_missing_files() {
        let dir = std::env::temp_dir().join(format!("ferritel-autodeploy-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(
            dir.join("10.0.0.2_autodeploy.txt"),
            "interface Vlan10\n shutdown\n\n",
        )
        .await
        .unwrap();

        let targets = vec![Target::new("10.0.0.1"), Target::new("10.0.0.2")];
        let lists = load_autodeploy(&dir, &targets).await.unwrap();

        assert_eq!(lists.len(), 1);
        assert_eq!(
            lists[&Target::new("10.0.0.2")],
            vec!["interface Vlan10", " shutdown"]
        );
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = load_target_list("/nonexistent/ferritel/targets.txt")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}

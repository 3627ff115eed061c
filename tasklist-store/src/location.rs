//! Table locations
//!
//! A location names either a file on the local filesystem or a table served
//! by a remote engine:
//!
//! - `/data/tasks.btr`, `tasks.btr`, `file:///data/tasks.btr`
//! - `btrv://user@host:7419/database?dbfile=tasks.btr&pwd=secret`

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};

const REMOTE_SCHEME: &str = "btrv://";
const FILE_SCHEME: &str = "file://";

/// A parsed table location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A file opened in-process
    LocalFile(PathBuf),
    /// A table served by a remote engine
    RemoteEngine(RemoteLocation),
}

/// Address of a table on a remote engine
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteLocation {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    /// Port, if the location names one
    pub port: Option<u16>,
    pub database: String,
    pub file: String,
}

impl RemoteLocation {
    /// Path of the table relative to the server's data directory
    pub fn file_path(&self) -> String {
        if self.database.is_empty() {
            self.file.clone()
        } else {
            format!("{}/{}", self.database, self.file)
        }
    }

    /// `host:port`, using `default_port` when the location names none
    pub fn address(&self, default_port: u16) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(default_port))
    }
}

// Hand-written so the password never reaches logs.
impl fmt::Debug for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteLocation")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("file", &self.file)
            .finish()
    }
}

impl Location {
    pub fn parse(location: &str) -> StoreResult<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(StoreError::InvalidLocation("empty location".into()));
        }

        if let Some(rest) = location.strip_prefix(REMOTE_SCHEME) {
            return parse_remote(rest).map(Location::RemoteEngine);
        }
        if let Some(path) = location.strip_prefix(FILE_SCHEME) {
            if path.is_empty() {
                return Err(StoreError::InvalidLocation(location.to_string()));
            }
            return Ok(Location::LocalFile(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = location.split_once("://") {
            return Err(StoreError::InvalidLocation(format!(
                "unsupported scheme '{}'",
                scheme
            )));
        }

        Ok(Location::LocalFile(PathBuf::from(location)))
    }
}

impl FromStr for Location {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Location::parse(s)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::LocalFile(path) => write!(f, "{}", path.display()),
            Location::RemoteEngine(remote) => {
                write!(f, "{}", REMOTE_SCHEME)?;
                if let Some(user) = &remote.user {
                    write!(f, "{}@", user)?;
                }
                write!(f, "{}", remote.host)?;
                if let Some(port) = remote.port {
                    write!(f, ":{}", port)?;
                }
                write!(f, "/{}?dbfile={}", remote.database, remote.file)
            }
        }
    }
}

/// Parse `[user@]host[:port]/database?dbfile=<file>[&pwd=<secret>]`
fn parse_remote(rest: &str) -> StoreResult<RemoteLocation> {
    let invalid = |why: &str| StoreError::InvalidLocation(format!("{}{}: {}", REMOTE_SCHEME, rest, why));

    let (authority, tail) = rest.split_once('/').unwrap_or((rest, ""));
    let (database, query) = tail.split_once('?').unwrap_or((tail, ""));

    let (user, host_port) = match authority.rsplit_once('@') {
        Some((user, host_port)) if !user.is_empty() => (Some(user.to_string()), host_port),
        Some((_, host_port)) => (None, host_port),
        None => (None, authority),
    };

    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
            (host, Some(port))
        }
        None => (host_port, None),
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    let mut file = None;
    let mut password = None;
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        match name {
            "dbfile" => file = Some(value.to_string()),
            "pwd" => password = Some(value.to_string()),
            // Unknown parameters are ignored.
            _ => {}
        }
    }
    let file = file
        .filter(|f| !f.is_empty())
        .ok_or_else(|| invalid("missing dbfile parameter"))?;

    Ok(RemoteLocation {
        user,
        password,
        host: host.to_string(),
        port,
        database: database.trim_end_matches('/').to_string(),
        file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_is_local() {
        assert_eq!(
            Location::parse("/data/tasks.btr").unwrap(),
            Location::LocalFile(PathBuf::from("/data/tasks.btr"))
        );
        assert_eq!(
            Location::parse("file:///data/tasks.btr").unwrap(),
            Location::LocalFile(PathBuf::from("/data/tasks.btr"))
        );
    }

    #[test]
    fn test_remote_location() {
        let location =
            Location::parse("btrv://user@192.168.1.20/phonedemo?dbfile=tasklist.btr&pwd=passwd")
                .unwrap();

        let Location::RemoteEngine(remote) = location else {
            panic!("expected remote location");
        };
        assert_eq!(remote.user.as_deref(), Some("user"));
        assert_eq!(remote.password.as_deref(), Some("passwd"));
        assert_eq!(remote.host, "192.168.1.20");
        assert_eq!(remote.port, None);
        assert_eq!(remote.database, "phonedemo");
        assert_eq!(remote.file_path(), "phonedemo/tasklist.btr");
        assert_eq!(remote.address(7419), "192.168.1.20:7419");
    }

    #[test]
    fn test_remote_with_port_and_no_user() {
        let location = Location::parse("btrv://localhost:9000/db?dbfile=t.btr").unwrap();
        let Location::RemoteEngine(remote) = location else {
            panic!("expected remote location");
        };
        assert_eq!(remote.user, None);
        assert_eq!(remote.address(7419), "localhost:9000");
    }

    #[test]
    fn test_invalid_locations() {
        for bad in [
            "",
            "ftp://host/x",
            "btrv://host/db",
            "btrv:///db?dbfile=x",
            "btrv://host:port/db?dbfile=x",
            "file://",
        ] {
            assert!(
                matches!(Location::parse(bad), Err(StoreError::InvalidLocation(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_display_hides_password() {
        let location = Location::parse("btrv://u@h/db?dbfile=t.btr&pwd=secret").unwrap();
        let shown = location.to_string();
        assert_eq!(shown, "btrv://u@h/db?dbfile=t.btr");
        assert!(!format!("{:?}", location).contains("secret"));
    }
}

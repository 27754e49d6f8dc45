use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

/// Everything but RFC 3986 unreserved characters is escaped in userinfo.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Connection details for one logical database inside the shared container.
///
/// All endpoints produced by a single provisioning call share host, port
/// and credentials; only `database` differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEndpoint {
    /// Full `postgresql://` connection URL.
    pub url: String,
    /// Logical database name the URL points at.
    pub database: String,
}

impl DatabaseEndpoint {
    /// Build an endpoint from its connection parts. Credentials are
    /// percent-encoded.
    pub fn new(host: &str, port: u16, user: &str, password: &str, database: &str) -> Self {
        let user = utf8_percent_encode(user, USERINFO);
        let password = utf8_percent_encode(password, USERINFO);
        Self {
            url: format!("postgresql://{user}:{password}@{host}:{port}/{database}"),
            database: database.to_string(),
        }
    }
}

impl std::fmt::Display for DatabaseEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.database)
    }
}

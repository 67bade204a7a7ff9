//! `mongodb://[user[:password]@]host[:port][,host...][/[database][?options]]`

use std::{collections::HashSet, str::FromStr, time::Duration};

use percent_encoding::percent_decode_str;
use strsim::jaro_winkler;

use super::{ClientOptions, ServerAddress, TlsOptions};
use crate::{
    auth::Credential,
    concern::{Acknowledgment, ReadConcern, WriteConcern},
    error::{Error, Result},
    selection_criteria::{ReadPreference, TagSet},
};

/// Every recognized option, lowercased. Unknown options are compared against these to suggest a
/// correction.
const KNOWN_OPTIONS: &[&str] = &[
    "acceptablelatencyms",
    "appname",
    "authmechanism",
    "authsource",
    "autoreconnect",
    "buffermaxentries",
    "connecttimeoutms",
    "connectwithnoprimary",
    "fsync",
    "hainterval",
    "heartbeatfrequencyms",
    "j",
    "journal",
    "localthresholdms",
    "maxpoolsize",
    "maxstalenessseconds",
    "poolsize",
    "readconcernlevel",
    "readpreference",
    "readpreferencetags",
    "reconnectinterval",
    "reconnecttries",
    "replicaset",
    "sockettimeoutms",
    "ssl",
    "sslca",
    "sslcert",
    "tls",
    "tlscafile",
    "tlscertificatekeyfile",
    "w",
    "wtimeoutms",
];

/// How close an unknown option must be to a known one for the error to suggest it.
const SUGGESTION_THRESHOLD: f64 = 0.84;

/// The RFC 3986 general delimiters, which must be percent-encoded inside userinfo.
const USERINFO_DELIMITERS: &[char] = &[':', '/', '?', '#', '[', ']', '@'];

const FORBIDDEN_IN_DATABASE_NAME: &[char] = &['/', '\\', ' ', '"', '$'];

const MIN_HEARTBEAT_FREQUENCY_MS: u64 = 500;

fn invalid(message: impl Into<String>) -> Error {
    Error::invalid_argument(message)
}

fn decode(raw: &str, what: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| invalid(format!("{} is not valid percent-encoded UTF-8", what)))
}

/// Rejects delimiters and any `%` that does not start an escape sequence.
fn check_userinfo(raw: &str, what: &str) -> Result<()> {
    if raw.contains(USERINFO_DELIMITERS) {
        return Err(invalid(format!("the {} must be percent-encoded", what)));
    }
    let stray_percent = raw.split('%').skip(1).any(|after| {
        after.len() < 2 || !after.as_bytes()[..2].iter().all(u8::is_ascii_hexdigit)
    });
    if stray_percent {
        return Err(invalid(format!("the {} contains a `%` that is not an escape", what)));
    }
    Ok(())
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

/// The sections of a connection string, still encoded.
#[derive(Debug, PartialEq)]
struct Sections<'a> {
    userinfo: Option<&'a str>,
    hosts: &'a str,
    database: Option<&'a str>,
    options: Option<&'a str>,
}

impl<'a> Sections<'a> {
    fn split(uri: &'a str) -> Result<Self> {
        let rest = match uri.split_once("://") {
            Some(("mongodb", rest)) => rest,
            Some((scheme, _)) => {
                return Err(invalid(format!("unsupported connection string scheme `{}`", scheme)))
            }
            None => return Err(invalid("the connection string has no scheme")),
        };

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, non_empty(path)),
            None if rest.contains('?') => {
                return Err(invalid("a `/` must separate the hosts from the options"))
            }
            None => (rest, None),
        };

        // Unescaped `@` is rejected in userinfo later, so the last one ends it.
        let (userinfo, hosts) = match authority.rsplit_once('@') {
            Some((userinfo, hosts)) => (non_empty(userinfo), hosts),
            None => (None, authority),
        };
        if hosts.is_empty() {
            return Err(invalid("the connection string names no hosts"));
        }

        let (database, options) = match path.map(|path| path.split_once('?')) {
            Some(Some((database, options))) => (non_empty(database), non_empty(options)),
            Some(None) => (path, None),
            None => (None, None),
        };

        Ok(Self {
            userinfo,
            hosts,
            database,
            options,
        })
    }
}

pub(super) fn parse_connection_string(uri: &str) -> Result<ClientOptions> {
    let sections = Sections::split(uri)?;

    let database = sections
        .database
        .map(|raw| decode(raw, "database name"))
        .transpose()?;
    if let Some(ref name) = database {
        if name.contains(FORBIDDEN_IN_DATABASE_NAME) {
            return Err(invalid(format!("`{}` is not a valid database name", name)));
        }
    }

    let mut builder = OptionsBuilder::default();
    builder.options.hosts = sections
        .hosts
        .split(',')
        .map(|host| ServerAddress::parse(decode(host, "host")?))
        .collect::<Result<_>>()?;

    if let Some(query) = sections.options {
        builder.apply_query(query)?;
    }

    if let Some(userinfo) = sections.userinfo {
        let credential = builder.credential(userinfo, database)?;
        builder.options.credential = Some(credential);
    }

    builder.build()
}

/// Collects options in the order they appear, then reconciles the ones that depend on each
/// other in [`OptionsBuilder::build`].
#[derive(Debug, Default)]
struct OptionsBuilder {
    options: ClientOptions,
    auth_source: Option<String>,
    auth_mechanism: Option<String>,
    read_preference: Option<ReadPreference>,
    tag_sets: Vec<TagSet>,
    max_staleness: Option<Duration>,
    write_concern: WriteConcern,
    tls_enabled: Option<bool>,
    tls: TlsOptions,
}

/// A query string value that failed to parse as the type `option` expects.
fn bad_value(option: &str, expected: &str) -> Error {
    invalid(format!("the `{}` option must be {}", option, expected))
}

fn boolean(option: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(bad_value(option, "`true` or `false`")),
    }
}

fn number<T: FromStr>(option: &str, value: &str, expected: &str) -> Result<T> {
    value.parse().map_err(|_| bad_value(option, expected))
}

fn millis(option: &str, value: &str) -> Result<Duration> {
    number(option, value, "a non-negative integer").map(Duration::from_millis)
}

/// `key:value` pairs separated by commas. An empty value is the empty tag set, which matches any
/// server.
fn tag_set(value: &str) -> Result<TagSet> {
    if value.is_empty() {
        return Ok(TagSet::new());
    }
    value
        .split(',')
        .map(|pair| match pair.split_once(':') {
            Some((key, tag)) => Ok((key.to_string(), tag.to_string())),
            None => Err(invalid(format!(
                "read preference tag `{}` is not of the form `key:value`",
                pair
            ))),
        })
        .collect()
}

fn unknown_option(option: &str) -> Error {
    let closest = KNOWN_OPTIONS
        .iter()
        .map(|known| (jaro_winkler(known, option), *known))
        .max_by(|a, b| a.0.total_cmp(&b.0));

    let mut message = format!("{} is an invalid option", option);
    if let Some((_, known)) = closest.filter(|(score, _)| *score >= SUGGESTION_THRESHOLD) {
        message.push_str(&format!(". An option with a similar name exists: {}", known));
    }
    invalid(message)
}

impl OptionsBuilder {
    fn apply_query(&mut self, query: &str) -> Result<()> {
        let mut seen = HashSet::new();

        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(invalid(format!("`{}` is not a `key=value` option", pair)));
            };
            let key = key.to_lowercase();
            // Tag sets are the only option given once per entry of a list.
            if key != "readpreferencetags" && !seen.insert(key.clone()) {
                return Err(invalid(format!("the `{}` option is given more than once", key)));
            }
            let value = percent_decode_str(value).decode_utf8_lossy();
            self.apply(&key, &value)?;
        }
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let options = &mut self.options;
        match key {
            "appname" => options.app_name = Some(value.to_string()),
            "authmechanism" => self.auth_mechanism = Some(value.to_string()),
            "authsource" => self.auth_source = Some(value.to_string()),
            "autoreconnect" => options.auto_reconnect = Some(boolean(key, value)?),
            "buffermaxentries" => {
                options.buffer_max_entries = Some(number(key, value, "an integer")?)
            }
            "connecttimeoutms" => options.connect_timeout = Some(millis(key, value)?),
            "connectwithnoprimary" => options.connect_with_no_primary = Some(boolean(key, value)?),
            "heartbeatfrequencyms" | "hainterval" => {
                let frequency = millis(key, value)?;
                if frequency < Duration::from_millis(MIN_HEARTBEAT_FREQUENCY_MS) {
                    return Err(bad_value(key, "at least 500"));
                }
                options.heartbeat_freq = Some(frequency);
            }
            "localthresholdms" | "acceptablelatencyms" => {
                options.local_threshold = Some(millis(key, value)?)
            }
            "maxpoolsize" | "poolsize" => {
                options.max_pool_size = Some(number(key, value, "a positive integer")?)
            }
            "readconcernlevel" => options.read_concern = Some(ReadConcern::custom(value)),
            "reconnectinterval" => options.reconnect_interval = Some(millis(key, value)?),
            "reconnecttries" => {
                options.reconnect_tries = Some(number(key, value, "a positive integer")?)
            }
            "replicaset" => options.repl_set_name = Some(value.to_string()),
            // Zero disables the timeout.
            "sockettimeoutms" => {
                options.socket_timeout = Some(millis(key, value)?).filter(|d| !d.is_zero())
            }

            "readpreference" => {
                let read_pref = ReadPreference::from_mode(value).ok_or_else(|| {
                    invalid(format!("`{}` is not a read preference mode", value))
                })?;
                self.read_preference = Some(read_pref);
            }
            "readpreferencetags" => self.tag_sets.push(tag_set(value)?),
            "maxstalenessseconds" => {
                // -1 and 0 both mean no bound.
                let seconds: i64 = number(key, value, "an integer")?;
                self.max_staleness = u64::try_from(seconds)
                    .ok()
                    .filter(|s| *s > 0)
                    .map(Duration::from_secs);
            }

            "w" => {
                self.write_concern.w = Some(match value.parse::<i32>() {
                    Ok(nodes) => Acknowledgment::from(nodes),
                    Err(_) => Acknowledgment::from(value),
                })
            }
            "wtimeoutms" => self.write_concern.w_timeout = Some(millis(key, value)?),
            "journal" | "j" => self.write_concern.journal = Some(boolean(key, value)?),
            "fsync" => self.write_concern.fsync = Some(boolean(key, value)?),

            "tls" | "ssl" => {
                let enabled = boolean(key, value)?;
                if self.tls_enabled.is_some_and(|earlier| earlier != enabled) {
                    return Err(invalid("`tls` and `ssl` must agree"));
                }
                self.tls_enabled = Some(enabled);
            }
            "tlscafile" | "sslca" => self.tls.ca_file_path = Some(value.into()),
            "tlscertificatekeyfile" | "sslcert" => {
                self.tls.cert_key_file_path = Some(value.into())
            }

            other => return Err(unknown_option(other)),
        }
        Ok(())
    }

    /// The credential source is `authSource`, else the database in the path, else `admin`.
    fn credential(&mut self, userinfo: &str, database: Option<String>) -> Result<Credential> {
        let (username, password) = match userinfo.split_once(':') {
            Some((username, password)) => (username, Some(password)),
            None => (userinfo, None),
        };

        check_userinfo(username, "username")?;
        let mut credential = Credential {
            username: Some(decode(username, "username")?),
            ..Default::default()
        };
        if let Some(password) = password {
            check_userinfo(password, "password")?;
            credential.password = Some(decode(password, "password")?);
        }

        let source = match self.auth_source.take() {
            Some(source) if source.is_empty() => {
                return Err(invalid("`authSource` must not be empty"))
            }
            Some(source) => source,
            None => database.unwrap_or_else(|| "admin".to_string()),
        };
        credential.source = Some(source);
        credential.mechanism = self.auth_mechanism.take();
        Ok(credential)
    }

    fn build(self) -> Result<ClientOptions> {
        let Self {
            mut options,
            mut read_preference,
            tag_sets,
            max_staleness,
            write_concern,
            tls_enabled,
            tls,
            ..
        } = self;

        let needs_mode = |option: &str| {
            invalid(format!("`{}` requires `readPreference` to be set", option))
        };
        if !tag_sets.is_empty() {
            let mode = read_preference.ok_or_else(|| needs_mode("readPreferenceTags"))?;
            read_preference = Some(mode.with_tags(tag_sets)?);
        }
        if let Some(max_staleness) = max_staleness {
            let mode = read_preference.ok_or_else(|| needs_mode("maxStalenessSeconds"))?;
            read_preference = Some(mode.with_max_staleness(max_staleness)?);
        }
        options.read_preference = read_preference;

        if !write_concern.is_empty() {
            write_concern.validate()?;
            options.write_concern = Some(write_concern);
        }

        let has_tls_files = tls.ca_file_path.is_some() || tls.cert_key_file_path.is_some();
        options.tls = match tls_enabled {
            Some(false) if has_tls_files => {
                return Err(invalid("TLS files cannot be given together with `tls=false`"))
            }
            Some(false) => None,
            Some(true) => Some(tls),
            None => has_tls_files.then_some(tls),
        };

        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::Sections;

    #[test]
    fn splits_sections() {
        assert_eq!(
            Sections::split("mongodb://u:p@a,b:27018/db?w=1").unwrap(),
            Sections {
                userinfo: Some("u:p"),
                hosts: "a,b:27018",
                database: Some("db"),
                options: Some("w=1"),
            }
        );
        assert_eq!(
            Sections::split("mongodb://a/?w=1").unwrap(),
            Sections {
                userinfo: None,
                hosts: "a",
                database: None,
                options: Some("w=1"),
            }
        );
        assert!(Sections::split("mongodb://u@/db").is_err());
    }
}

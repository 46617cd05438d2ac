//! Configuration for the compliance audit router.
//!
//! Values are layered with the `config` crate: the `Default` impls below,
//! then an optional YAML file, then `CAR_`-prefixed environment variables
//! (`CAR_JIRACONFIG_TOKEN` sets `jiraconfig.token`). The resulting [`Config`]
//! is passed explicitly into every component; nothing reads it globally.

use ::config::{Environment, File, FileFormat, Source};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::ticket::TransitionTable;

/// Application name, used for the config file name and metric labels.
pub const APP_NAME: &str = "compliance-audit-router";

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "CAR";

const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Default guidance comment left on new tickets.
pub const DEFAULT_MESSAGE_TEMPLATE: &str = "{{Username}}\n\n\
    This action requires justification. \
    Please provide the justification in the comments section below.";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    NotFound(PathBuf),

    /// A source could not be read, or a value has the wrong shape.
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// Every validation problem found, reported together.
    #[error("configuration invalid: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "de::flexible_bool")]
    pub verbose: bool,
    /// Skip every mutating Jira call and log it instead.
    #[serde(rename = "dryrun", deserialize_with = "de::flexible_bool")]
    pub dry_run: bool,
    #[serde(rename = "listenport")]
    pub listen_port: u16,
    /// Handlebars template for the first comment; `{{Username}}` is the assignee mention.
    #[serde(rename = "messagetemplate")]
    pub message_template: String,
    #[serde(rename = "ldapconfig")]
    pub ldap: LdapConfig,
    #[serde(rename = "splunkconfig")]
    pub splunk: SplunkConfig,
    #[serde(rename = "jiraconfig")]
    pub jira: JiraConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose: true,
            dry_run: true,
            listen_port: DEFAULT_LISTEN_PORT,
            message_template: DEFAULT_MESSAGE_TEMPLATE.to_string(),
            ldap: LdapConfig::default(),
            splunk: SplunkConfig::default(),
            jira: JiraConfig::default(),
        }
    }
}

/// Splunk search API settings.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct SplunkConfig {
    pub host: String,
    pub token: String,
    #[serde(rename = "allowinsecure", deserialize_with = "de::flexible_bool")]
    pub allow_insecure: bool,
}

/// Jira REST API settings.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    pub host: String,
    /// Personal access token, or the password when `username` is set.
    pub token: String,
    /// Enables basic auth. Intended for development only.
    pub username: String,
    #[serde(rename = "allowinsecure", deserialize_with = "de::flexible_bool")]
    pub allow_insecure: bool,
    /// Project key new tickets are filed under.
    pub key: String,
    #[serde(rename = "issuetype")]
    pub issue_type: String,
    pub transitions: TransitionTable,
}

/// LDAP directory settings. Lookups are skipped unless `enabled`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct LdapConfig {
    #[serde(deserialize_with = "de::flexible_bool")]
    pub enabled: bool,
    pub host: String,
    #[serde(rename = "allowinsecure", deserialize_with = "de::flexible_bool")]
    pub allow_insecure: bool,
    pub username: String,
    pub password: String,
    #[serde(rename = "searchbase")]
    pub search_base: String,
    /// One of `base`, `one` or `sub`.
    pub scope: String,
    /// A YAML list, or a comma-separated string from the environment.
    #[serde(deserialize_with = "de::string_list")]
    pub attributes: Vec<String>,
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            allow_insecure: false,
            username: String::new(),
            password: String::new(),
            search_base: String::new(),
            scope: "sub".to_string(),
            attributes: vec!["uid".to_string(), "manager".to_string()],
        }
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "*****"
    }
}

impl fmt::Debug for SplunkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplunkConfig")
            .field("host", &self.host)
            .field("token", &redact(&self.token))
            .field("allow_insecure", &self.allow_insecure)
            .finish()
    }
}

impl fmt::Debug for JiraConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JiraConfig")
            .field("host", &self.host)
            .field("token", &redact(&self.token))
            .field("username", &self.username)
            .field("allow_insecure", &self.allow_insecure)
            .field("key", &self.key)
            .field("issue_type", &self.issue_type)
            .field("transitions", &self.transitions)
            .finish()
    }
}

impl fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapConfig")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("allow_insecure", &self.allow_insecure)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("search_base", &self.search_base)
            .field("scope", &self.scope)
            .field("attributes", &self.attributes)
            .finish()
    }
}

impl Config {
    /// Load, overlay the environment and validate.
    ///
    /// An explicit path must exist. Without one, the working directory and
    /// `$HOME/.config/compliance-audit-router/` are searched (the working
    /// directory wins), and a missing file just means the environment is the
    /// only source.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let files = match explicit {
            Some(path) if !path.is_file() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => {
                info!(path = %path.display(), "Using config file");
                vec![File::from(path).format(FileFormat::Yaml).required(true)]
            }
            None => search_paths()
                .iter()
                .map(|path| File::from(path.as_path()).format(FileFormat::Yaml).required(false))
                .collect(),
        };

        let config = Self::layered(files, environment())?;
        config.validate()?;
        Ok(config)
    }

    /// Deserialize `files` (later ones win) with `env` on top.
    pub fn layered<S>(files: Vec<S>, env: Environment) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        let mut builder = ::config::Config::builder();
        for file in files {
            builder = builder.add_source(file);
        }
        let settings = builder.add_source(env).build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Check the whole configuration, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// All validation problems, in a stable order.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        problems.extend(self.missing_fields());
        problems.extend(self.unparsable_hosts());
        problems.extend(self.unpaired_credentials());
        problems.extend(self.template_problems());
        problems.extend(self.transition_problems());
        problems
    }

    fn missing_fields(&self) -> Vec<String> {
        let mut required = vec![
            ("splunkconfig.host", &self.splunk.host),
            ("jiraconfig.host", &self.jira.host),
            ("splunkconfig.token", &self.splunk.token),
            ("jiraconfig.token", &self.jira.token),
            ("jiraconfig.key", &self.jira.key),
            ("jiraconfig.issuetype", &self.jira.issue_type),
        ];
        if self.ldap.enabled {
            required.extend([
                ("ldapconfig.host", &self.ldap.host),
                ("ldapconfig.searchbase", &self.ldap.search_base),
                ("ldapconfig.scope", &self.ldap.scope),
            ]);
        }

        required
            .into_iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| format!("missing required configuration value: {name}"))
            .collect()
    }

    fn unparsable_hosts(&self) -> Vec<String> {
        let hosts = [
            ("ldapconfig.host", &self.ldap.host),
            ("splunkconfig.host", &self.splunk.host),
            ("jiraconfig.host", &self.jira.host),
        ];

        let mut problems = Vec::new();
        for (name, value) in hosts {
            if value.is_empty() {
                continue;
            }
            match reqwest::Url::parse(value) {
                Err(_) => problems.push(format!("{name} failed to parse URL: {value}")),
                Ok(url) => {
                    if url.host_str().is_none_or(str::is_empty) {
                        problems.push(format!("{name} invalid URL: {value}"));
                    }
                    if !matches!(url.scheme(), "http" | "https" | "ldaps") {
                        problems.push(format!("{name} missing scheme: {value}"));
                    }
                }
            }
        }
        problems
    }

    fn unpaired_credentials(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.ldap.username.is_empty() && self.ldap.password.is_empty() {
            problems.push("ldapconfig.username provided without ldapconfig.password".to_string());
        }
        if !self.jira.username.is_empty() && self.jira.token.is_empty() {
            problems.push("jiraconfig.username provided without jiraconfig.token".to_string());
        }
        problems
    }

    fn template_problems(&self) -> Vec<String> {
        match handlebars::Template::compile(&self.message_template) {
            Ok(_) => Vec::new(),
            Err(e) => vec![format!("message template failed to parse: {e}")],
        }
    }

    fn transition_problems(&self) -> Vec<String> {
        self.jira
            .transitions
            .unset_roles()
            .into_iter()
            .map(|role| format!("missing required configuration value: jiraconfig.transitions.{role}"))
            .collect()
    }
}

/// Candidate config files, lowest precedence first.
fn search_paths() -> Vec<PathBuf> {
    let file_name = format!("{APP_NAME}.yaml");
    let mut paths = Vec::new();
    if let Ok(home) = env::var("HOME") {
        paths.push(
            PathBuf::from(home)
                .join(".config")
                .join(APP_NAME)
                .join(&file_name),
        );
    }
    paths.push(PathBuf::from(file_name));
    paths
}

/// `CAR_`-prefixed overrides, `_` separating nested keys.
#[must_use]
pub fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("_")
}

/// Field deserializers shared by the YAML and environment sources.
mod de {
    use serde::de::{self, Deserializer, SeqAccess, Unexpected, Visitor};
    use std::fmt;

    /// A boolean, `0`/`1`, or one of `t`, `true`, `f`, `false` in lower,
    /// upper or title case. Anything else is an error.
    pub fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BoolVisitor;

        impl<'de> Visitor<'de> for BoolVisitor {
            type Value = bool;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
                match v {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(E::invalid_value(Unexpected::Signed(v), &self)),
                }
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
                match v {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(E::invalid_value(Unexpected::Unsigned(v), &self)),
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
                match v {
                    "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
                    "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
                    _ => Err(E::invalid_value(Unexpected::Str(v), &self)),
                }
            }
        }

        deserializer.deserialize_any(BoolVisitor)
    }

    pub fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = Vec<String>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a list of strings or a comma-separated string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Vec<String>, E> {
                Ok(v.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect())
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<String>, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element::<String>()? {
                    items.push(item);
                }
                Ok(items)
            }
        }

        deserializer.deserialize_any(ListVisitor)
    }
}

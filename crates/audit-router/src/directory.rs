//! Identity correlation through the corporate LDAP directory.

use async_trait::async_trait;
use ldap3::{ldap_escape, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::LdapConfig;

const UID_ATTRIBUTE: &str = "uid";
const MANAGER_ATTRIBUTE: &str = "manager";

/// A user and the uid of their manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryIdentity {
    pub user: String,
    pub manager: String,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("ldap error: {0}")]
    Ldap(#[from] ldap3::LdapError),

    #[error("no ldap entry found for user {0}")]
    NotFound(String),

    #[error("expected 1 ldap entry for user {username} but found {count}")]
    Ambiguous { username: String, count: usize },

    #[error("ldap entry for {username} has no {attribute} attribute")]
    MissingAttribute { username: String, attribute: String },

    #[error("invalid ldap search scope {0:?}")]
    InvalidScope(String),

    #[error("no uid field found for given ldap string")]
    NoUid,

    #[error("error parsing dn: {0}")]
    MalformedDn(String),
}

/// Resolves a username to its directory identity and manager.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn lookup_user(&self, username: &str) -> Result<DirectoryIdentity, DirectoryError>;
}

/// [`DirectoryClient`] backed by `ldap3`. Opens one connection per lookup.
#[derive(Debug, Clone)]
pub struct LdapDirectory {
    config: LdapConfig,
    scope: Scope,
}

impl LdapDirectory {
    pub fn new(config: LdapConfig) -> Result<Self, DirectoryError> {
        let scope = parse_scope(&config.scope)?;
        Ok(Self { config, scope })
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectory {
    #[instrument(skip(self))]
    async fn lookup_user(&self, username: &str) -> Result<DirectoryIdentity, DirectoryError> {
        let settings = LdapConnSettings::new().set_no_tls_verify(self.config.allow_insecure);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.config.host).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection ended with an error");
            }
        });

        if !self.config.username.is_empty() {
            ldap.simple_bind(&self.config.username, &self.config.password)
                .await?
                .success()?;
        }

        let filter = user_filter(username);
        debug!(base = %self.config.search_base, filter = %filter, "Searching LDAP");
        let (entries, _) = ldap
            .search(
                &self.config.search_base,
                self.scope,
                &filter,
                self.config.attributes.clone(),
            )
            .await?
            .success()?;

        let entries: Vec<SearchEntry> = entries.into_iter().map(SearchEntry::construct).collect();
        if let Err(e) = ldap.unbind().await {
            debug!(error = %e, "LDAP unbind failed");
        }

        match entries.as_slice() {
            [] => Err(DirectoryError::NotFound(username.to_string())),
            [entry] => identity_from_attrs(username, &entry.attrs),
            many => Err(DirectoryError::Ambiguous {
                username: username.to_string(),
                count: many.len(),
            }),
        }
    }
}

fn parse_scope(scope: &str) -> Result<Scope, DirectoryError> {
    match scope {
        "base" => Ok(Scope::Base),
        "one" => Ok(Scope::OneLevel),
        "sub" => Ok(Scope::Subtree),
        other => Err(DirectoryError::InvalidScope(other.to_string())),
    }
}

fn user_filter(username: &str) -> String {
    format!("({UID_ATTRIBUTE}={})", ldap_escape(username))
}

fn identity_from_attrs(
    username: &str,
    attrs: &HashMap<String, Vec<String>>,
) -> Result<DirectoryIdentity, DirectoryError> {
    let first = |attribute: &str| attrs.get(attribute).and_then(|values| values.first());

    let user = first(UID_ATTRIBUTE).map_or_else(|| username.to_string(), Clone::clone);
    let manager_dn = first(MANAGER_ATTRIBUTE).ok_or_else(|| DirectoryError::MissingAttribute {
        username: username.to_string(),
        attribute: MANAGER_ATTRIBUTE.to_string(),
    })?;

    Ok(DirectoryIdentity {
        user,
        manager: get_uid(manager_dn)?,
    })
}

/// Extract the `uid` value from a distinguished name.
pub fn get_uid(dn: &str) -> Result<String, DirectoryError> {
    parse_dn(dn)?
        .into_iter()
        .find(|(attr, _)| attr.eq_ignore_ascii_case(UID_ATTRIBUTE))
        .map(|(_, value)| value)
        .ok_or(DirectoryError::NoUid)
}

/// Split a DN into its `type=value` pairs, unescaping values.
///
/// Hex escapes are raw bytes, so a multi-byte character arrives as several
/// escapes and is only decoded once the whole value is collected.
fn parse_dn(dn: &str) -> Result<Vec<(String, String)>, DirectoryError> {
    let mut pairs = Vec::new();
    if dn.trim().is_empty() {
        return Ok(pairs);
    }

    let mut attr = Vec::new();
    let mut value = Vec::new();
    let mut in_value = false;
    let mut chars = dn.chars();
    let mut utf8 = [0; 4];

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| DirectoryError::MalformedDn("got corrupted escaped character".to_string()))?;
                let target = if in_value { &mut value } else { &mut attr };
                if escaped.is_ascii_hexdigit() {
                    let low = chars
                        .next()
                        .filter(char::is_ascii_hexdigit)
                        .ok_or_else(|| DirectoryError::MalformedDn("failed to decode escaped character".to_string()))?;
                    let byte = u8::from_str_radix(&format!("{escaped}{low}"), 16)
                        .map_err(|e| DirectoryError::MalformedDn(e.to_string()))?;
                    target.push(byte);
                } else {
                    target.extend_from_slice(escaped.encode_utf8(&mut utf8).as_bytes());
                }
            }
            '=' if !in_value => in_value = true,
            ',' | '+' | ';' => {
                if !in_value {
                    return Err(DirectoryError::MalformedDn(
                        "DN ended with incomplete type, value pair".to_string(),
                    ));
                }
                pairs.push((decode(&attr)?, decode(&value)?));
                attr.clear();
                value.clear();
                in_value = false;
            }
            c => {
                let target = if in_value { &mut value } else { &mut attr };
                target.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
        }
    }

    let attr = decode(&attr)?;
    if !in_value || attr.is_empty() {
        return Err(DirectoryError::MalformedDn(
            "DN ended with incomplete type, value pair".to_string(),
        ));
    }
    pairs.push((attr, decode(&value)?));
    Ok(pairs)
}

fn decode(bytes: &[u8]) -> Result<String, DirectoryError> {
    String::from_utf8(bytes.to_vec())
        .map(|s| s.trim().to_string())
        .map_err(|e| DirectoryError::MalformedDn(format!("invalid utf-8 in value: {e}")))
}

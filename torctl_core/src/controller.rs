use crate::error::ControlError;
use crate::kernel::Kernel;
use crate::response::{getconf, getinfo, SingleLineResponse};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use torctl_socket::{ControlMessage, ControlSocket, Endpoint, LineControlSocket};

#[cfg(unix)]
use std::path::PathBuf;

pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1";
pub const DEFAULT_CONTROL_PORT: u16 = 9051;
#[cfg(unix)]
pub const DEFAULT_CONTROL_SOCKET_PATH: &str = "/var/run/tor/control";

/// Distinguishes "no default was supplied" from "the supplied default is
/// itself an empty/absent value". A `Fallback::Value(None)` and
/// `Fallback::Undefined` behave identically at the call site that asked for
/// one but differently at the ones that didn't.
pub enum Fallback<T> {
    Undefined,
    Value(T),
}

impl<T> Fallback<T> {
    fn into_value(self) -> Option<T> {
        match self {
            Fallback::Undefined => None,
            Fallback::Value(value) => Some(value),
        }
    }
}

/// A `SETCONF`/`RESETCONF` option value.
pub enum ConfValue {
    Single(String),
    Multiple(Vec<String>),
}

const MAPPED_CONFIG_KEYS: &[&str] = &[
    "hiddenservicedir",
    "hiddenserviceport",
    "hiddenserviceversion",
    "hiddenserviceauthorizeclient",
    "hiddenserviceoptions",
];
const HIDDEN_SERVICE_GROUP: &str = "HiddenServiceOptions";

fn mapped_wire_key(normalized: &str) -> Option<&'static str> {
    MAPPED_CONFIG_KEYS
        .contains(&normalized)
        .then_some(HIDDEN_SERVICE_GROUP)
}

fn case_insensitive_lookup<'a, V>(map: &'a HashMap<String, V>, key: &str) -> Option<&'a V> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// The command layer: formats `GETINFO`/`GETCONF`/
/// `SETCONF`/`RESETCONF`/`LOADCONF`/`SAVECONF` and hands their replies to the
/// parsers in [`crate::response`]. Thin by design — every protocol invariant
/// lives in [`Kernel`] or the parsers; this is just argument shaping and
/// status-code classification.
pub struct Controller {
    kernel: Kernel,
}

impl Controller {
    /// Wraps an arbitrary adapter and connects it. The constructor
    /// `from_port`/`from_socket_file` build on top of this for the two
    /// transports Tor supports; tests use it directly with a mock
    /// adapter.
    pub async fn from_socket(socket: Arc<dyn ControlSocket>) -> Result<Self, ControlError> {
        let kernel = Kernel::new(socket);
        kernel.connect().await?;
        Ok(Self { kernel })
    }

    /// Opens a TCP connection to Tor's `ControlPort`.
    pub async fn from_port(addr: &str, port: u16) -> Result<Self, ControlError> {
        let socket = LineControlSocket::new(Endpoint::Tcp {
            addr: addr.to_string(),
            port,
        });
        Self::from_socket(socket).await
    }

    /// Opens a local domain-socket connection to Tor's control socket file.
    #[cfg(unix)]
    pub async fn from_socket_file(path: impl Into<PathBuf>) -> Result<Self, ControlError> {
        let socket = LineControlSocket::new(Endpoint::Unix { path: path.into() });
        Self::from_socket(socket).await
    }

    /// The underlying kernel: event handlers, status listeners, and manual
    /// reconnect/close all live there.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn is_alive(&self) -> bool {
        self.kernel.is_alive()
    }

    pub async fn close(&self) {
        self.kernel.close().await;
    }

    /// Fetches a single `GETINFO` key.
    pub async fn get_info(
        &self,
        key: &str,
        default: Fallback<String>,
    ) -> Result<String, ControlError> {
        match self.get_info_one(key).await {
            Ok(value) => Ok(value),
            Err(err) => default.into_value().ok_or(err),
        }
    }

    /// Fetches several `GETINFO` keys in one round trip.
    pub async fn get_info_many(
        &self,
        keys: &[&str],
        default: Fallback<HashMap<String, String>>,
    ) -> Result<HashMap<String, String>, ControlError> {
        match self.get_info_raw(keys).await {
            Ok(map) => Ok(map),
            Err(err) => default.into_value().ok_or(err),
        }
    }

    async fn get_info_one(&self, key: &str) -> Result<String, ControlError> {
        let mut map = self.get_info_raw(&[key]).await?;
        map.remove(key).ok_or_else(|| {
            ControlError::MalformedFrame(format!(
                "GETINFO reply didn't include the requested key {key:?}"
            ))
        })
    }

    async fn get_info_raw(&self, keys: &[&str]) -> Result<HashMap<String, String>, ControlError> {
        let command = format!("GETINFO {}", keys.join(" "));
        let reply = self.kernel.msg(&command).await?;
        let entries = getinfo::parse(&reply)?;

        let requested: HashSet<&str> = keys.iter().copied().collect();
        let returned: HashSet<&str> = entries.keys().map(String::as_str).collect();
        if requested != returned {
            return Err(ControlError::MalformedFrame(format!(
                "GETINFO reply keys {returned:?} didn't match the request {requested:?}"
            )));
        }
        Ok(entries)
    }

    /// Scalar `GETCONF` lookup with Tor's original (first) value.
    pub async fn get_conf(
        &self,
        param: &str,
        default: Fallback<Option<String>>,
    ) -> Result<Option<String>, ControlError> {
        let normalized = param.trim().to_lowercase();
        if normalized.is_empty() {
            return Ok(default.into_value().unwrap_or(None));
        }

        let fallback_value = match &default {
            Fallback::Undefined => None,
            Fallback::Value(v) => v.clone(),
        };
        let map_default = match default {
            Fallback::Undefined => Fallback::Undefined,
            Fallback::Value(_) => Fallback::Value(HashMap::new()),
        };

        let map = self.get_conf_map(&[param], map_default).await?;
        match case_insensitive_lookup(&map, &normalized).and_then(|values| values.first().cloned())
        {
            Some(value) => Ok(Some(value)),
            None => Ok(fallback_value),
        }
    }

    /// `GETCONF` lookup for a single param, `multiple=True` form: every
    /// value Tor holds for `param`, not just the first. Pairs with
    /// [`Controller::get_conf`] the same way [`Controller::get_info_many`]
    /// pairs with [`Controller::get_info`].
    pub async fn get_conf_multiple(
        &self,
        param: &str,
        default: Fallback<Vec<String>>,
    ) -> Result<Vec<String>, ControlError> {
        let normalized = param.trim().to_lowercase();
        if normalized.is_empty() {
            return Ok(default.into_value().unwrap_or_default());
        }

        let fallback_value = match &default {
            Fallback::Undefined => None,
            Fallback::Value(v) => Some(v.clone()),
        };
        let map_default = match default {
            Fallback::Undefined => Fallback::Undefined,
            Fallback::Value(_) => Fallback::Value(HashMap::new()),
        };

        let map = self.get_conf_map(&[param], map_default).await?;
        match case_insensitive_lookup(&map, &normalized) {
            Some(values) => Ok(values.clone()),
            None => Ok(fallback_value.unwrap_or_default()),
        }
    }

    /// Full `GETCONF` lookup: mapped-key rewriting, original-casing
    /// restoration, all values per key preserved.
    pub async fn get_conf_map(
        &self,
        params: &[&str],
        default: Fallback<HashMap<String, Vec<String>>>,
    ) -> Result<HashMap<String, Vec<String>>, ControlError> {
        match self.get_conf_map_inner(params).await {
            Ok(map) => Ok(map),
            Err(err) => default.into_value().ok_or(err),
        }
    }

    async fn get_conf_map_inner(
        &self,
        params: &[&str],
    ) -> Result<HashMap<String, Vec<String>>, ControlError> {
        let mut wire_keys: Vec<String> = Vec::new();
        let mut original_casing: HashMap<String, String> = HashMap::new();

        for raw in params {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let normalized = trimmed.to_lowercase();
            original_casing
                .entry(normalized.clone())
                .or_insert_with(|| trimmed.to_string());

            let wire_key = mapped_wire_key(&normalized)
                .map(str::to_string)
                .unwrap_or_else(|| trimmed.to_string());
            if !wire_keys.contains(&wire_key) {
                wire_keys.push(wire_key);
            }
        }
        if wire_keys.is_empty() {
            return Ok(HashMap::new());
        }

        let command = format!("GETCONF {}", wire_keys.join(" "));
        let reply = self.kernel.msg(&command).await?;
        let raw_entries = getconf::parse(&reply)?;

        let mut entries = HashMap::with_capacity(raw_entries.len());
        for (key, values) in raw_entries {
            let restored = if key == HIDDEN_SERVICE_GROUP {
                key
            } else {
                original_casing
                    .values()
                    .find(|original| original.eq_ignore_ascii_case(&key))
                    .cloned()
                    .unwrap_or(key)
            };
            entries.insert(restored, values);
        }
        Ok(entries)
    }

    /// `SETCONF key=value`.
    pub async fn set_conf(&self, key: &str, value: &str) -> Result<(), ControlError> {
        self.set_options(
            &[(key.to_string(), Some(ConfValue::Single(value.to_string())))],
            false,
        )
        .await
    }

    /// `RESETCONF key ...`, resetting each to its default.
    pub async fn reset_conf(&self, keys: &[&str]) -> Result<(), ControlError> {
        let params: Vec<(String, Option<ConfValue>)> =
            keys.iter().map(|k| (k.to_string(), None)).collect();
        self.set_options(&params, true).await
    }

    /// `SETCONF`/`RESETCONF` with explicit, possibly multi-valued,
    /// option assignments. `params` is ordered — required for options like
    /// `ExitPolicy`/hidden-service groups where order is meaningful.
    pub async fn set_options(
        &self,
        params: &[(String, Option<ConfValue>)],
        reset: bool,
    ) -> Result<(), ControlError> {
        let tokens = build_setconf_tokens(params);
        let keyword = if reset { "RESETCONF" } else { "SETCONF" };
        let command = if tokens.is_empty() {
            keyword.to_string()
        } else {
            format!("{keyword} {}", tokens.join(" "))
        };

        let reply = self.kernel.msg(&command).await?;
        classify_setconf_reply(&reply)
    }

    /// Replaces Tor's live configuration with `text` without
    /// touching the on-disk torrc.
    pub async fn load_conf(&self, text: &str) -> Result<(), ControlError> {
        let command = format!("LOADCONF\n{text}");
        let reply = self.kernel.msg(&command).await?;
        let reply = SingleLineResponse::parse(&reply);
        if reply.is_ok() {
            return Ok(());
        }

        let code = reply.code.as_str();
        let message = reply.message.as_str();
        if code == "552" {
            const PREFIX: &str =
                "Invalid config file: Failed to parse/validate config: Unknown option";
            if message.starts_with(PREFIX) && message.len() > 70 {
                let rest = &message[70..];
                let end = rest.find('.').unwrap_or(rest.len());
                let end = end.saturating_sub(1);
                return Err(ControlError::InvalidArguments {
                    code: code.to_string(),
                    keys: vec![rest[..end].to_string()],
                });
            }
        }
        if matches!(code, "552" | "553") {
            return Err(ControlError::InvalidRequest {
                code: code.to_string(),
                message: message.to_string(),
            });
        }
        Err(ControlError::MalformedFrame(format!(
            "unexpected status from LOADCONF: {code}"
        )))
    }

    /// Flushes Tor's live configuration to its torrc.
    pub async fn save_conf(&self) -> Result<(), ControlError> {
        let reply = self.kernel.msg("SAVECONF").await?;
        let reply = SingleLineResponse::parse(&reply);
        if reply.is_ok() {
            return Ok(());
        }
        let code = reply.code.as_str();
        if code == "551" {
            return Err(ControlError::OperationFailed {
                code: code.to_string(),
                message: reply.message.clone(),
            });
        }
        Err(ControlError::MalformedFrame(format!(
            "unexpected status from SAVECONF: {code}"
        )))
    }
}

/// Runs `body` against `controller` and always closes it afterward, success
/// or error. Rust has no async `Drop`, so this combinator is the
/// close-on-exit guarantee's home instead of RAII.
pub async fn scoped<'a, F, Fut, T>(controller: &'a Controller, body: F) -> T
where
    F: FnOnce(&'a Controller) -> Fut,
    Fut: std::future::Future<Output = T> + 'a,
{
    let result = body(controller).await;
    controller.close().await;
    result
}

fn build_setconf_tokens(params: &[(String, Option<ConfValue>)]) -> Vec<String> {
    let mut tokens = Vec::new();
    for (key, value) in params {
        match value {
            None => tokens.push(key.clone()),
            Some(ConfValue::Single(v)) => tokens.push(format!("{key}=\"{}\"", v.trim())),
            Some(ConfValue::Multiple(items)) if items.is_empty() => tokens.push(key.clone()),
            Some(ConfValue::Multiple(items)) => {
                for item in items {
                    tokens.push(format!("{key}=\"{}\"", item.trim()));
                }
            }
        }
    }
    tokens
}

fn classify_setconf_reply(reply: &ControlMessage) -> Result<(), ControlError> {
    let reply = SingleLineResponse::parse(reply);
    if reply.is_ok() {
        return Ok(());
    }
    let code = reply.code.as_str();
    let message = reply.message.as_str();

    if code == "552" {
        const PREFIX: &str = "Unrecognized option: Unknown option '";
        if let Some(rest) = message.strip_prefix(PREFIX) {
            if let Some(end) = rest.find('\'') {
                return Err(ControlError::InvalidArguments {
                    code: code.to_string(),
                    keys: vec![rest[..end].to_string()],
                });
            }
        }
    }
    if matches!(code, "552" | "513" | "553") {
        return Err(ControlError::InvalidRequest {
            code: code.to_string(),
            message: message.to_string(),
        });
    }
    Err(ControlError::MalformedFrame(format!(
        "unexpected status from SETCONF/RESETCONF: {code}"
    )))
}

//! Session controller: bootstrap plus the single `transform` entry point.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::buffer::SharedBuffer;
use crate::call::CallSynchronizer;
use crate::error::{BridgeError, BridgeResult};
use crate::memory::BufferRole;
use crate::module::TransformModule;

/// Default maximum URL length, the de facto limit in the wild.
pub const DEFAULT_MAX_URL_LEN: usize = 2000;

/// Default maximum document length; the dominant resource limit of the
/// whole system.
pub const DEFAULT_MAX_HTML_LEN: usize = 4 * 1024 * 1024;

/// Default minimum plausible output length. A valid transformed document
/// is larger than this; anything shorter is a data-quality signal.
pub const DEFAULT_MIN_VALID_OUTPUT_LEN: usize = 1000;

/// Limits and knobs for one session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Maximum URL input length in bytes.
    pub max_url_len: usize,
    /// Maximum HTML input length in bytes.
    pub max_html_len: usize,
    /// Maximum transformed-output length in bytes. Defaults to twice the
    /// input limit: transforms may inflate a document, and overallocating
    /// a few MBs beats failing the transformation.
    pub max_output_len: usize,
    /// Outputs shorter than this are logged as suspicious but still
    /// returned.
    pub min_valid_output_len: usize,
    /// Per-call deadline in seconds. `None` reproduces the raw protocol,
    /// which has no timeout: a call the module never completes parks the
    /// session forever.
    pub call_timeout_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_url_len: DEFAULT_MAX_URL_LEN,
            max_html_len: DEFAULT_MAX_HTML_LEN,
            max_output_len: DEFAULT_MAX_HTML_LEN.saturating_mul(2),
            min_valid_output_len: DEFAULT_MIN_VALID_OUTPUT_LEN,
            call_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    /// Check the configuration for nonsensical limits.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidConfig`] if any buffer limit is zero.
    pub fn validate(&self) -> BridgeResult<()> {
        for (name, value) in [
            ("max_url_len", self.max_url_len),
            ("max_html_len", self.max_html_len),
            ("max_output_len", self.max_output_len),
        ] {
            if value == 0 {
                return Err(BridgeError::InvalidConfig {
                    reason: format!("{name} must be nonzero"),
                });
            }
        }
        Ok(())
    }

    /// Per-call deadline, if one is configured.
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

/// One bootstrapped instance of the computation unit plus its buffer
/// handles, serving transform calls one at a time.
///
/// The bridging state (buffer handles, call slot) is owned here and
/// passed by reference downwards — there is no process-global state, so
/// independent sessions over independent module instances can coexist.
///
/// `transform` takes `&mut self`: the three buffer handles are mutable
/// shared state with no per-call isolation, so concurrent calls against
/// one session are a compile error rather than a data race.
pub struct Session {
    module: Arc<dyn TransformModule>,
    config: SessionConfig,
    url_in: SharedBuffer,
    html_in: SharedBuffer,
    html_out: SharedBuffer,
    calls: CallSynchronizer,
    poisoned: bool,
}

impl Session {
    /// Bootstrap a session over an instantiated module.
    ///
    /// Establishes the three buffer handles from the module's capabilities
    /// and wires the call synchronizer.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidConfig`] if `config` fails
    /// validation.
    pub fn new(module: Arc<dyn TransformModule>, config: SessionConfig) -> BridgeResult<Self> {
        config.validate()?;
        let url_in = SharedBuffer::new(
            BufferRole::UrlIn,
            config.max_url_len,
            module.buffer_source(BufferRole::UrlIn),
        );
        let html_in = SharedBuffer::new(
            BufferRole::HtmlIn,
            config.max_html_len,
            module.buffer_source(BufferRole::HtmlIn),
        );
        let html_out = SharedBuffer::new(
            BufferRole::HtmlOut,
            config.max_output_len,
            module.buffer_source(BufferRole::HtmlOut),
        );
        let calls = CallSynchronizer::new(config.call_timeout());
        Ok(Self {
            module,
            config,
            url_in,
            html_in,
            html_out,
            calls,
            poisoned: false,
        })
    }

    /// The configuration this session was built with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Transform the document at `url` given as `html`, returning the
    /// transformed HTML.
    ///
    /// Input sizes are validated before any buffer is touched, so a
    /// rejected call leaves no partially-written state for the next one.
    /// Both input frames are fully written before the module is invoked,
    /// and the output frame is read only after the module signals
    /// completion.
    ///
    /// An output shorter than the configured plausible minimum is logged
    /// as suspicious but still returned — that heuristic is a data-quality
    /// signal, not a protocol error.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::SessionUnusable`] if an earlier call timed out.
    /// - [`BridgeError::InputTooLarge`] if either input exceeds its limit;
    ///   the module is never invoked.
    /// - [`BridgeError::TransformFailed`] / [`BridgeError::Timeout`] if
    ///   the module did not complete normally. A timeout poisons the
    ///   session: the module may still be running against the buffers, so
    ///   reuse would race it.
    /// - [`BridgeError::CorruptedBuffer`] / [`BridgeError::DecodeError`]
    ///   if the output buffer fails protocol validation.
    pub async fn transform(&mut self, url: &str, html: &str) -> BridgeResult<String> {
        if self.poisoned {
            return Err(BridgeError::SessionUnusable);
        }
        if url.len() > self.config.max_url_len {
            return Err(BridgeError::InputTooLarge {
                role: BufferRole::UrlIn,
                len: url.len(),
                max: self.config.max_url_len,
            });
        }
        if html.len() > self.config.max_html_len {
            return Err(BridgeError::InputTooLarge {
                role: BufferRole::HtmlIn,
                len: html.len(),
                max: self.config.max_html_len,
            });
        }

        debug!(url = %url, html_len = html.len(), "starting transform");
        self.url_in.write_framed(url).await?;
        self.html_in.write_framed(html).await?;

        let module = Arc::clone(&self.module);
        let invoked = self
            .calls
            .invoke(move |completion| module.begin_transform(completion))
            .await;
        if let Err(e) = invoked {
            if matches!(e, BridgeError::Timeout { .. }) {
                // The module may still be running against the buffers, so
                // this session must not serve another call. Hand every held
                // view back so the module side is not blocked on us.
                self.poisoned = true;
                self.release_buffers().await;
            }
            error!(url = %url, error = %e, "transform call did not complete");
            return Err(e);
        }

        let output = match self.html_out.read_framed().await {
            Ok(output) => output,
            Err(e) => {
                error!(url = %url, error = %e, "output buffer failed protocol validation");
                return Err(e);
            }
        };
        if output.len() < self.config.min_valid_output_len {
            warn!(
                url = %url,
                output_len = output.len(),
                min = self.config.min_valid_output_len,
                "transform output shorter than plausible minimum"
            );
        }
        Ok(output)
    }

    /// Release all held memory views back to the module.
    ///
    /// Called at teardown so the module side can resume; the session stays
    /// usable afterwards (views are re-acquired on demand), this merely
    /// returns regions the host no longer needs.
    pub async fn release_buffers(&mut self) {
        self.url_in.release().await;
        self.html_in.release().await;
        self.html_out.release().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_the_wire_protocol() {
        let config = SessionConfig::default();
        assert_eq!(config.max_url_len, 2000);
        assert_eq!(config.max_html_len, 4 * 1024 * 1024);
        assert_eq!(config.max_output_len, 8 * 1024 * 1024);
        assert_eq!(config.min_valid_output_len, 1000);
        assert!(config.call_timeout().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn zero_limits_rejected() {
        let config = SessionConfig {
            max_html_len: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BridgeError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: SessionConfig = serde_json::from_str("{\"max_url_len\": 512}").unwrap();
        assert_eq!(config.max_url_len, 512);
        assert_eq!(config.max_html_len, DEFAULT_MAX_HTML_LEN);
    }
}

use crate::error::Error;
use crate::frame::{MAX_RECORD_PAYLOAD, TLS_HEADER_LEN};

/// Largest plaintext fragment handed to `wrap` in one call. TLS encrypts
/// at most 2^14 plaintext bytes per record, so feeding more only forces
/// the codec to fragment internally.
pub const MAX_FRAGMENT: usize = 16 * 1024;

/// Configuration for a port's pipeline resources.
#[derive(Clone)]
pub struct Config {
    /// Number of crypto pool threads. 0 = number of CPUs.
    pub crypto_threads: usize,
    /// Application buffer size reported by the TLS session. The port
    /// clamps the effective fragment bound to `min(this, MAX_FRAGMENT)`.
    pub app_buffer_size: usize,
    /// Capacity of the persistent decrypt destination buffer. Must hold
    /// one full TLS record's plaintext plus expansion.
    pub packet_buffer_size: usize,
    /// Default capacity of pooled containers (serializer output,
    /// ciphertext).
    pub pool_buffer_size: usize,
    /// Maximum buffers retained on the pool free list.
    pub pool_buffer_count: usize,
    /// Bytes read from the socket per `read` call while filling the
    /// read stream.
    pub read_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crypto_threads: 0,
            app_buffer_size: MAX_FRAGMENT,
            packet_buffer_size: TLS_HEADER_LEN + MAX_RECORD_PAYLOAD + 2048,
            pool_buffer_size: 32768,
            pool_buffer_count: 512,
            read_chunk_size: 8192,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is
    /// out of range.
    pub fn validate(&self) -> Result<(), Error> {
        if self.app_buffer_size == 0 {
            return Err(Error::Config("app_buffer_size must be > 0".into()));
        }
        if self.packet_buffer_size < TLS_HEADER_LEN + MAX_RECORD_PAYLOAD {
            return Err(Error::Config(
                "packet_buffer_size must hold one full TLS record".into(),
            ));
        }
        if self.app_buffer_size > self.packet_buffer_size {
            return Err(Error::Config(
                "app_buffer_size must not exceed packet_buffer_size".into(),
            ));
        }
        if self.pool_buffer_size == 0 {
            return Err(Error::Config("pool_buffer_size must be > 0".into()));
        }
        if self.read_chunk_size == 0 {
            return Err(Error::Config("read_chunk_size must be > 0".into()));
        }
        if self.crypto_threads > 1024 {
            return Err(Error::Config("crypto_threads must be <= 1024".into()));
        }
        Ok(())
    }
}

/// Builder for [`Config`] with discoverable methods and `build()`
/// validation.
///
/// # Example
///
/// ```rust
/// use gateline::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .crypto_threads(2)
///     .pool_buffers(256, 32768)
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Crypto pool ──────────────────────────────────────────────────

    /// Set the number of crypto pool threads. 0 = number of CPUs.
    pub fn crypto_threads(mut self, n: usize) -> Self {
        self.config.crypto_threads = n;
        self
    }

    // ── Buffer sizing ────────────────────────────────────────────────

    /// Set the TLS session's application buffer size.
    pub fn app_buffer_size(mut self, n: usize) -> Self {
        self.config.app_buffer_size = n;
        self
    }

    /// Set the decrypt destination buffer capacity.
    pub fn packet_buffer_size(mut self, n: usize) -> Self {
        self.config.packet_buffer_size = n;
        self
    }

    /// Set the pool free-list retention and default container size.
    pub fn pool_buffers(mut self, count: usize, size: usize) -> Self {
        self.config.pool_buffer_count = count;
        self.config.pool_buffer_size = size;
        self
    }

    // ── Socket read ──────────────────────────────────────────────────

    /// Set the per-call socket read chunk size.
    pub fn read_chunk_size(mut self, n: usize) -> Self {
        self.config.read_chunk_size = n;
        self
    }

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Mutable access to the underlying config for fields not covered
    /// by builder methods.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    // ── Terminal ─────────────────────────────────────────────────────

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

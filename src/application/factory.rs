//! Factory stamping out buffered front-ends that share one pool.

use crate::application::buffered::{BufferedConfig, BufferedSink};
use crate::application::dispatcher::DispatcherConfig;
use crate::application::error::BuildError;
use crate::application::limiter::{EventLimiter, LimiterConfig};
use crate::application::ports::{DiagnosticSink, EventSink, SinkWriter};
use crate::application::registry::DispatcherRegistry;
use crate::application::sink::ManagedSink;
use crate::domain::payload::Ttl;
use crate::domain::severity::Severity;
use std::fmt;
use std::sync::Arc;

type WriterFactory<W> = dyn Fn(&str) -> W + Send + Sync;

/// Builds a named [`ManagedSink`] around a fresh writer and wraps it in a
/// [`BufferedSink`] fed by the pool named in the dispatcher config.
///
/// # Examples
///
/// ```
/// use sink_relay::{BufferedSinkFactory, DispatcherConfig, DispatcherRegistry, EventSink};
/// use sink_relay::infrastructure::writers::NullWriter;
///
/// let registry = DispatcherRegistry::new();
/// let factory = BufferedSinkFactory::builder()
///     .with_writer_factory(|_name: &str| NullWriter::new())
///     .with_registry(registry.clone())
///     .with_pool(DispatcherConfig::new("io").with_pool_size(1))
///     .build()
///     .unwrap();
///
/// let audit = factory.create("audit").unwrap();
/// let access = factory.create("access").unwrap();
/// assert_eq!(audit.dispatcher().name(), access.dispatcher().name());
/// registry.shutdown_all(None);
/// ```
pub struct BufferedSinkFactory<W: SinkWriter + 'static> {
    writers: Arc<WriterFactory<W>>,
    registry: DispatcherRegistry,
    pool: DispatcherConfig,
    buffer: BufferedConfig,
    min_severity: Severity,
    ttl: Ttl,
    limiter: Option<LimiterConfig>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
}

impl<W: SinkWriter + 'static> BufferedSinkFactory<W> {
    /// Create a builder.
    pub fn builder() -> BufferedSinkFactoryBuilder<W> {
        BufferedSinkFactoryBuilder::new()
    }

    /// The registry the pools live in.
    pub fn registry(&self) -> &DispatcherRegistry {
        &self.registry
    }

    /// Create a closed front-end named `name`.
    ///
    /// The pool is started on first use and shared by every front-end this
    /// factory creates.
    ///
    /// # Errors
    /// Returns a `BuildError` if the sink or the pool cannot be built.
    pub fn create(&self, name: &str) -> Result<BufferedSink, BuildError> {
        let mut builder = ManagedSink::builder()
            .with_name(name)
            .with_writer((self.writers)(name))
            .with_min_severity(self.min_severity)
            .with_ttl(self.ttl);
        if let Some(config) = &self.limiter {
            builder = builder.with_limiter(Arc::new(EventLimiter::new(config.clone())));
        }
        if let Some(diagnostics) = &self.diagnostics {
            builder = builder.with_diagnostics(Arc::clone(diagnostics));
        }
        let sink: Arc<dyn EventSink> = Arc::new(builder.build()?);

        let dispatcher = self.registry.get_or_start(self.pool.clone())?;
        tracing::debug!(sink = %name, pool = %dispatcher.name(), "created buffered sink");

        BufferedSink::builder()
            .with_name(name)
            .with_sink(sink)
            .with_dispatcher(dispatcher)
            .with_config(self.buffer.clone())
            .build()
    }
}

impl<W: SinkWriter + 'static> fmt::Debug for BufferedSinkFactory<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedSinkFactory")
            .field("pool", &self.pool)
            .field("buffer", &self.buffer)
            .field("min_severity", &self.min_severity)
            .field("limiter", &self.limiter)
            .finish()
    }
}

/// Builder for [`BufferedSinkFactory`].
pub struct BufferedSinkFactoryBuilder<W: SinkWriter + 'static> {
    writers: Option<Arc<WriterFactory<W>>>,
    registry: Option<DispatcherRegistry>,
    pool: DispatcherConfig,
    buffer: BufferedConfig,
    min_severity: Severity,
    ttl: Ttl,
    limiter: Option<LimiterConfig>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
}

impl<W: SinkWriter + 'static> BufferedSinkFactoryBuilder<W> {
    fn new() -> Self {
        Self {
            writers: None,
            registry: None,
            pool: DispatcherConfig::default(),
            buffer: BufferedConfig::default(),
            min_severity: Severity::None,
            ttl: Ttl::Inherit,
            limiter: None,
            diagnostics: None,
        }
    }

    /// Set the closure creating one writer per sink name (required).
    pub fn with_writer_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> W + Send + Sync + 'static,
    {
        self.writers = Some(Arc::new(factory));
        self
    }

    /// Use an existing registry. A fresh one is created otherwise.
    pub fn with_registry(mut self, registry: DispatcherRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the pool the front-ends share.
    pub fn with_pool(mut self, pool: DispatcherConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the front-end settings.
    pub fn with_buffer_config(mut self, buffer: BufferedConfig) -> Self {
        self.buffer = buffer;
        self
    }

    /// Minimum severity for every created sink.
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    /// TTL override for every created sink.
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    /// Give each created sink its own limiter with these settings.
    pub fn with_limiter(mut self, limiter: LimiterConfig) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Fallback error channel for every created sink.
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Build the factory.
    ///
    /// # Errors
    /// Returns `BuildError::MissingSinkFactory` without a writer factory, or
    /// the pool config's validation error.
    pub fn build(self) -> Result<BufferedSinkFactory<W>, BuildError> {
        let writers = self.writers.ok_or(BuildError::MissingSinkFactory)?;
        self.pool.validate()?;
        if self.buffer.signal_timeout.is_zero() {
            return Err(BuildError::ZeroSignalTimeout);
        }

        Ok(BufferedSinkFactory {
            writers,
            registry: self.registry.unwrap_or_default(),
            pool: self.pool,
            buffer: self.buffer,
            min_severity: self.min_severity,
            ttl: self.ttl,
            limiter: self.limiter,
            diagnostics: self.diagnostics,
        })
    }
}

//! Capability probes: metadata extraction with per-kind fallback chains.
//!
//! A [`MetadataSource`] reads one file with one mechanism (an image header
//! parser, a full decoder, a container discoverer). The [`Prober`] keeps an
//! ordered chain of sources per [`MediaKind`], tries them in order until one
//! succeeds, and bounds the whole attempt with a timeout.
//!
//! # Example
//!
//! ```no_run
//! use media_columns::media::MediaKind;
//! use media_columns::probe::Prober;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let prober = Prober::with_defaults("ffprobe", Duration::from_secs(2));
//! match prober.probe(Path::new("/photos/a.png"), MediaKind::Image) {
//!     Ok(metadata) => println!("{metadata:?}"),
//!     Err(e) => eprintln!("unknown: {e}"),
//! }
//! ```

pub mod image;
pub mod video;

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::media::{MediaKind, Metadata};

pub use self::image::{ImageDecodeReader, ImageHeaderReader};
pub use self::video::FfprobeDiscoverer;

/// Default bound on a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can occur while probing a file.
///
/// None of these are cached; the next request for the file probes again.
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    /// No source recognised the format.
    #[error("Unsupported format: {0}")]
    Unsupported(PathBuf),

    /// The format was recognised but the data is invalid.
    #[error("Corrupt media {path}: {reason}")]
    Corrupt {
        /// Probed file
        path: PathBuf,
        /// Decoder message
        reason: String,
    },

    /// The provider itself is missing (e.g. `ffprobe` not installed).
    #[error("Metadata source {source_name} unavailable: {reason}")]
    Unavailable {
        /// Name of the source
        source_name: &'static str,
        /// Why it could not run
        reason: String,
    },

    /// Reading the file failed.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Probed file
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The probe did not finish within the bound.
    #[error("Probe timed out after {timeout:?}: {path}")]
    Timeout {
        /// Probed file
        path: PathBuf,
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// Every source in a fallback chain failed.
    #[error("No metadata source could read {path}")]
    Unreadable {
        /// Probed file
        path: PathBuf,
        /// Error from the last source tried
        #[source]
        last: Box<ProbeError>,
    },
}

impl ProbeError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// One metadata-extraction mechanism.
///
/// Implementations are synchronous and may block; the [`Prober`] runs them
/// off the caller's thread.
pub trait MetadataSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Read metadata for `path`.
    fn try_read(&self, path: &Path) -> Result<Metadata, ProbeError>;
}

type Chain = Vec<Arc<dyn MetadataSource>>;

/// Runs the fallback chain for a media kind under a timeout.
#[derive(Clone)]
pub struct Prober {
    image_chain: Chain,
    video_chain: Chain,
    timeout: Duration,
}

impl std::fmt::Debug for Prober {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |chain: &Chain| chain.iter().map(|s| s.name()).collect::<Vec<_>>();
        f.debug_struct("Prober")
            .field("image_chain", &names(&self.image_chain))
            .field("video_chain", &names(&self.video_chain))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Prober {
    /// Create a prober with empty chains.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            image_chain: Vec::new(),
            video_chain: Vec::new(),
            timeout,
        }
    }

    /// The standard chains: image header, then image decode; ffprobe for video.
    #[must_use]
    pub fn with_defaults(ffprobe: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self::new(timeout)
            .with_source(MediaKind::Image, Arc::new(ImageHeaderReader))
            .with_source(MediaKind::Image, Arc::new(ImageDecodeReader))
            .with_source(
                MediaKind::Video,
                Arc::new(FfprobeDiscoverer::new(ffprobe).with_timeout(timeout)),
            )
    }

    /// Append a source to the end of the chain for `kind`.
    #[must_use]
    pub fn with_source(mut self, kind: MediaKind, source: Arc<dyn MetadataSource>) -> Self {
        match kind {
            MediaKind::Image => self.image_chain.push(source),
            MediaKind::Video => self.video_chain.push(source),
        }
        self
    }

    /// Bound on a single probe.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Names of the sources tried for `kind`, in order.
    #[must_use]
    pub fn source_names(&self, kind: MediaKind) -> Vec<&'static str> {
        self.chain(kind).iter().map(|s| s.name()).collect()
    }

    fn chain(&self, kind: MediaKind) -> &Chain {
        match kind {
            MediaKind::Image => &self.image_chain,
            MediaKind::Video => &self.video_chain,
        }
    }

    /// Probe `path` as `kind`.
    ///
    /// The chain runs on a worker thread. If it does not finish within the
    /// timeout the worker is abandoned (it finishes and cleans up on its own)
    /// and [`ProbeError::Timeout`] is returned.
    ///
    /// # Arguments
    ///
    /// * `path` - File to read
    /// * `kind` - Selects the image or video chain
    ///
    /// # Returns
    ///
    /// Metadata from the first source in the chain that reads the file.
    ///
    /// # Errors
    ///
    /// * [`ProbeError::Timeout`] - the chain did not finish in time
    /// * [`ProbeError::Unreadable`] - every source of a multi-source chain failed
    /// * [`ProbeError::Unavailable`] - the chain for `kind` is empty
    /// * any other variant - the error of a single-source chain, unchanged
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use media_columns::probe::{Prober, DEFAULT_PROBE_TIMEOUT};
    /// use media_columns::MediaKind;
    /// use std::path::Path;
    ///
    /// let prober = Prober::with_defaults("ffprobe", DEFAULT_PROBE_TIMEOUT);
    /// let metadata = prober.probe(Path::new("/videos/clip.mp4"), MediaKind::Video)?;
    /// println!("{metadata:?}");
    /// # Ok::<(), media_columns::ProbeError>(())
    /// ```
    pub fn probe(&self, path: &Path, kind: MediaKind) -> Result<Metadata, ProbeError> {
        let chain = self.chain(kind).clone();
        let owned = path.to_path_buf();
        let (tx, rx) = mpsc::sync_channel(1);

        thread::Builder::new()
            .name("media-probe".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_chain(&chain, &owned, kind)
                }))
                .unwrap_or_else(|_| Err(ProbeError::corrupt(&owned, "metadata source panicked")));
                // The receiver is gone if the caller already timed out.
                let _ = tx.send(result);
            })
            .map_err(|e| ProbeError::io(path, e))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                log::debug!(
                    "Probe of {} exceeded {:?}; abandoning",
                    path.display(),
                    self.timeout
                );
                Err(ProbeError::Timeout {
                    path: path.to_path_buf(),
                    timeout: self.timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(ProbeError::corrupt(path, "probe worker exited early"))
            }
        }
    }
}

/// Try each source in order; the first success wins.
fn run_chain(chain: &Chain, path: &Path, kind: MediaKind) -> Result<Metadata, ProbeError> {
    let mut last = None;

    for source in chain {
        match source.try_read(path) {
            Ok(metadata) if metadata.kind() == kind => {
                log::trace!("{} read {}", source.name(), path.display());
                return Ok(metadata);
            }
            Ok(metadata) => {
                last = Some(ProbeError::corrupt(
                    path,
                    format!("{} reported {} metadata", source.name(), metadata.kind()),
                ));
            }
            Err(e) => {
                log::debug!("{} could not read {}: {}", source.name(), path.display(), e);
                last = Some(e);
            }
        }
    }

    match last {
        // A single-source chain reports its own error unchanged.
        Some(e) if chain.len() == 1 => Err(e),
        Some(e) => Err(ProbeError::Unreadable {
            path: path.to_path_buf(),
            last: Box::new(e),
        }),
        None => Err(ProbeError::Unavailable {
            source_name: "none",
            reason: format!("no metadata source configured for {kind}"),
        }),
    }
}

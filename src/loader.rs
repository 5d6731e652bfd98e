//! Sample loading.
//!
//! The engine does not know where samples come from. A [`SampleLoader`]
//! turns a URI into a decoded [`SampleBuffer`]; [`load_all`] fans a batch
//! out over tokio tasks and either returns every buffer or every failure.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinSet;

use crate::dsp::sampler::SampleBuffer;
use crate::error::{LoadError, LoadFailure};

pub type LoadFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<SampleBuffer, LoadError>> + Send + 'a>>;

/// Asynchronous source of decoded samples.
pub trait SampleLoader: Send + Sync {
    fn load<'a>(&'a self, uri: &'a str) -> LoadFuture<'a>;
}

/// A load request for one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub track_id: String,
    pub uri: String,
}

/// Load every request in parallel. The buffers come back in request order;
/// if anything fails, all failures are returned instead and no buffer is.
pub async fn load_all(
    loader: Arc<dyn SampleLoader>,
    requests: &[LoadRequest],
) -> std::result::Result<Vec<Arc<SampleBuffer>>, Vec<LoadFailure>> {
    let mut set = JoinSet::new();
    for (index, request) in requests.iter().enumerate() {
        let loader = Arc::clone(&loader);
        let uri = request.uri.clone();
        set.spawn(async move { (index, loader.load(&uri).await) });
    }

    let mut buffers: Vec<Option<Arc<SampleBuffer>>> = vec![None; requests.len()];
    let mut failures = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(buffer))) => buffers[index] = Some(Arc::new(buffer)),
            Ok((index, Err(error))) => failures.push((index, error)),
            Err(e) => log::error!("sample load task failed: {e}"),
        }
    }

    // A panicked task leaves its slot empty.
    for (index, slot) in buffers.iter().enumerate() {
        if slot.is_none() && !failures.iter().any(|(i, _)| *i == index) {
            failures.push((index, LoadError::Io("load task aborted".into())));
        }
    }

    if !failures.is_empty() {
        failures.sort_by_key(|(index, _)| *index);
        return Err(failures
            .into_iter()
            .map(|(index, error)| LoadFailure {
                track_id: requests[index].track_id.clone(),
                uri: requests[index].uri.clone(),
                error,
            })
            .collect());
    }
    Ok(buffers.into_iter().flatten().collect())
}

/// Loads `.wav` files from disk, relative to an optional root directory, and
/// mixes them down to mono.
#[derive(Debug, Clone, Default)]
pub struct WavFileLoader {
    root: Option<PathBuf>,
}

impl WavFileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        WavFileLoader {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, uri: &str) -> PathBuf {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        match &self.root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        }
    }
}

impl SampleLoader for WavFileLoader {
    fn load<'a>(&'a self, uri: &'a str) -> LoadFuture<'a> {
        Box::pin(async move {
            let path = self.resolve(uri);
            let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => LoadError::NotFound(path.display().to_string()),
                _ => LoadError::Io(format!("{}: {e}", path.display())),
            })?;
            let buffer = decode_wav(&bytes).map_err(|e| LoadError::Decode(format!("{uri}: {e}")))?;
            if buffer.is_empty() {
                return Err(LoadError::Empty(uri.to_string()));
            }
            log::debug!("loaded {uri}: {} samples at {} Hz", buffer.len(), buffer.sample_rate);
            Ok(buffer)
        })
    }
}

/// Decode a WAV byte buffer into a mono sample buffer.
pub fn decode_wav(bytes: &[u8]) -> std::result::Result<SampleBuffer, hound::Error> {
    let mut reader = hound::WavReader::new(std::io::Cursor::new(bytes))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };
    Ok(SampleBuffer::from_interleaved(
        &samples,
        spec.channels as usize,
        spec.sample_rate,
    ))
}

/// In-memory loader for tests and embedded kits. URIs not registered fail
/// with [`LoadError::NotFound`]; registered failures are returned as given.
#[derive(Default)]
pub struct MemoryLoader {
    entries: Mutex<HashMap<String, std::result::Result<SampleBuffer, LoadError>>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<String>, buffer: SampleBuffer) {
        self.entries.lock().insert(uri.into(), Ok(buffer));
    }

    pub fn fail(&self, uri: impl Into<String>, error: LoadError) {
        self.entries.lock().insert(uri.into(), Err(error));
    }

    /// URIs requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl SampleLoader for MemoryLoader {
    fn load<'a>(&'a self, uri: &'a str) -> LoadFuture<'a> {
        self.requests.lock().push(uri.to_string());
        let result = self
            .entries
            .lock()
            .get(uri)
            .cloned()
            .unwrap_or_else(|| Err(LoadError::NotFound(uri.to_string())));
        Box::pin(async move { result })
    }
}

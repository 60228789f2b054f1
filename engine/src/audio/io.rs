use crate::mutex::UnsafeMutex;
use std::sync::Arc;
use wavers::Samples;

/// Largest block a processor is asked to render.
pub const AUDIO_BLOCK_MAX_RENDER_SIZE: usize = 2048;

/// Shared read-only silence.
pub static ZEROS: [f32; AUDIO_BLOCK_MAX_RENDER_SIZE] = [0.0; AUDIO_BLOCK_MAX_RENDER_SIZE];

pub type SampleBlock = Arc<UnsafeMutex<Samples<f32>>>;

#[derive(Debug, Clone, Default)]
enum ChannelSource {
    #[default]
    Own,
    Zero,
    Redirect(SampleBlock),
}

/// One output channel of a bus.
///
/// The channel owns a buffer but can also be pointed at silence or at another
/// channel's buffer, which lets containers forward audio without copying.
#[derive(Debug)]
pub struct AudioIO {
    pub buffer: SampleBlock,
    source: UnsafeMutex<ChannelSource>,
}

impl AudioIO {
    pub fn new(size: usize) -> Self {
        Self {
            buffer: Arc::new(UnsafeMutex::new(Samples::new(
                vec![0.0; size].into_boxed_slice(),
            ))),
            source: UnsafeMutex::new(ChannelSource::Own),
        }
    }

    /// Samples currently visible to readers of this channel.
    pub fn floats(&self) -> &[f32] {
        match self.source.lock() {
            ChannelSource::Own => &self.buffer.lock()[..],
            ChannelSource::Zero => &ZEROS[..],
            ChannelSource::Redirect(block) => &block.lock()[..],
        }
    }

    /// Writable own buffer, cancels any redirect.
    #[allow(clippy::mut_from_ref)]
    pub fn block(&self) -> &mut [f32] {
        *self.source.lock() = ChannelSource::Own;
        &mut self.buffer.lock()[..]
    }

    /// Make readers see `target` (or silence for `None`) instead of the own buffer.
    pub fn redirect(&self, target: Option<&AudioIO>) {
        let source = match target.and_then(|t| t.shared_block()) {
            Some(block) if Arc::ptr_eq(&block, &self.buffer) => ChannelSource::Own,
            Some(block) => ChannelSource::Redirect(block),
            None => ChannelSource::Zero,
        };
        *self.source.lock() = source;
    }

    /// The buffer readers of this channel end up in, `None` for silence.
    pub fn shared_block(&self) -> Option<SampleBlock> {
        match self.source.lock() {
            ChannelSource::Own => Some(self.buffer.clone()),
            ChannelSource::Zero => None,
            ChannelSource::Redirect(block) => Some(block.clone()),
        }
    }

    pub fn is_redirected(&self) -> bool {
        !matches!(self.source.lock(), ChannelSource::Own)
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for AudioIO {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }
}

impl Eq for AudioIO {}

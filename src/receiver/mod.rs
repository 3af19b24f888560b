//! Counterpart of the chunked transport: rebuilds snapshots from frames
//! and stores them as WAV files

mod assembler;

pub use assembler::{AssembledSnapshot, SnapshotAssembler, DEFAULT_MAX_FRAMES};

use crate::link::LinkStateMachine;
use crate::transport::{InboundMessage, MessageBus, Topics};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Route one inbound message into the assembler.
/// Returns the path of a snapshot written to `out_dir`, if this message completed one.
pub fn handle_message(
    assembler: &mut SnapshotAssembler,
    topics: &Topics,
    message: InboundMessage,
    out_dir: &Path,
) -> Option<PathBuf> {
    if message.topic == topics.audio_info() {
        let snapshot = match assembler.ingest_summary(&message.text()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring summary: {}", e);
                return None;
            }
        };

        if snapshot.data.is_empty() {
            warn!("Transfer {} delivered no frames: {}", snapshot.key(), snapshot.summary);
            return None;
        }

        if !snapshot.is_complete() {
            warn!(
                "Transfer {} incomplete: {} ({} missing frames)",
                snapshot.key(),
                snapshot.summary,
                snapshot.missing.len()
            );
        }

        return match snapshot.write_wav(out_dir) {
            Ok(path) => {
                info!("Saved snapshot {} ({} bytes) to {}", snapshot.key(), snapshot.data.len(), path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to write snapshot {}: {:#}", snapshot.key(), e);
                None
            }
        };
    }

    if let Some((key, index)) = topics.parse_chunk(&message.topic) {
        assembler.ingest_chunk(key, index, message.payload);
    }
    None
}

/// Subscribe to every audio topic and save snapshots until `shutdown` resolves
pub async fn run_receiver<B, F>(
    link: &mut LinkStateMachine<B>,
    topics: &Topics,
    sample_rate: u32,
    max_frames: usize,
    out_dir: &Path,
    loop_delay: Duration,
    shutdown: F,
) -> usize
where
    B: MessageBus,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut assembler = SnapshotAssembler::new(sample_rate).with_max_frames(max_frames);
    let mut saved = 0;
    link.add_subscription(topics.audio_wildcard());

    info!("Receiving snapshots on {} into {}", topics.audio_wildcard(), out_dir.display());

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(loop_delay) => {}
        }

        link.service().await;
        while let Some(message) = link.try_next_message() {
            if handle_message(&mut assembler, topics, message, out_dir).is_some() {
                saved += 1;
            }
        }
    }

    link.disconnect().await;
    info!("Receiver stopped after {} snapshots", saved);
    saved
}

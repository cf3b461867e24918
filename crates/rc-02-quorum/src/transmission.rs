//! # Transmission Scheduler
//!
//! Decides when each member of a DON transmits, without any coordination.
//!
//! ## Algorithm
//!
//! 1. `seed = keccak256(shared_secret ‖ transmission_id)`
//! 2. A ChaCha20 RNG seeded with it shuffles positions `0..N`; member `i`
//!    gets position `perm[i]`
//! 3. The schedule splits positions into consecutive waves; a member's delay
//!    is `wave_index × delta_stage`
//!
//! Every member derives the same map, so all of them agree on who sends
//! when. A member whose position falls outside every wave gets no entry and
//! must not transmit.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use shared_crypto::keccak256;
use shared_types::{PeerId, TransmissionConfig, TransmissionSchedule};
use std::collections::HashMap;
use std::time::Duration;

/// Wave sizes for a schedule over `n` members.
pub fn schedule_waves(schedule: TransmissionSchedule, n: usize) -> Vec<usize> {
    match schedule {
        TransmissionSchedule::AllAtOnce => vec![n],
        TransmissionSchedule::OneAtATime => vec![1; n],
    }
}

/// Keyed permutation of `0..n`.
fn permutation(n: usize, shared_secret: &[u8; 16], transmission_id: &str) -> Vec<usize> {
    let seed = keccak256(&[shared_secret.as_slice(), transmission_id.as_bytes()]);
    let mut rng = ChaCha20Rng::from_seed(seed);
    let mut positions: Vec<usize> = (0..n).collect();
    positions.shuffle(&mut rng);
    positions
}

/// Send delay of every member for one transmission.
pub fn peer_id_to_transmission_delay(
    members: &[PeerId],
    shared_secret: &[u8; 16],
    transmission_id: &str,
    config: &TransmissionConfig,
) -> HashMap<PeerId, Duration> {
    let waves = schedule_waves(config.schedule, members.len());
    let positions = permutation(members.len(), shared_secret, transmission_id);

    let mut delays = HashMap::with_capacity(members.len());
    for (member, position) in members.iter().zip(positions) {
        let mut cumulative = 0usize;
        for (wave, size) in waves.iter().enumerate() {
            cumulative += size;
            if position < cumulative {
                delays.insert(*member, config.delta_stage * wave as u32);
                break;
            }
        }
    }
    delays
}

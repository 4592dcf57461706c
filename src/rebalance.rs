//! Rebalancer / stealer (§4.8): on-idle work stealing and periodic load
//! redistribution across per-output runqueues.

use crate::ids::{InputHandle, OutputOrdinal, Timestamp};
use crate::input::Input;
use crate::runqueue::{rebalance_target, RunqueueSet};
use std::collections::HashMap;

/// Walk other outputs' runqueues in stable order and pick the first input
/// that is (a) not bound away from `stealing_output` and (b) has been
/// sitting on its current output for at least `migration_threshold`.
/// Removes it from the donor queue on success.
pub fn steal(
    runqueues: &mut RunqueueSet,
    stealing_output: OutputOrdinal,
    inputs: &HashMap<InputHandle, Input>,
    now: Timestamp,
    migration_threshold: Timestamp,
) -> Option<(OutputOrdinal, InputHandle)> {
    let num_outputs = runqueues.queues.len();
    for offset in 1..num_outputs {
        let donor = (stealing_output + offset) % num_outputs;
        let eligible = |handle: InputHandle| -> bool {
            let input = match inputs.get(&handle) {
                Some(i) => i,
                None => return false,
            };
            if !input.bindings.is_empty() && !input.bindings.contains(&stealing_output) {
                return false;
            }
            now.saturating_sub(input.last_ran_time) >= migration_threshold
        };
        if let Some(handle) = runqueues.queues[donor].take_first_matching(eligible) {
            return Some((donor, handle));
        }
    }
    None
}

/// Compute which inputs should migrate from which output to which, to bring
/// every queue to within one of `ceil(runnable / outputs)` (§4.8). Returns
/// `(from_output, handle, to_output)` triples; callers apply them under the
/// shared mutex. Blocked/unscheduled inputs are never candidates -- they
/// aren't in any runqueue to begin with.
pub fn plan_rebalance(
    runqueues: &RunqueueSet,
    inputs: &HashMap<InputHandle, Input>,
) -> Vec<(OutputOrdinal, InputHandle, OutputOrdinal)> {
    let num_outputs = runqueues.queues.len();
    if num_outputs == 0 {
        return Vec::new();
    }
    let target = rebalance_target(runqueues.total_runnable(), num_outputs);
    let mut moves = Vec::new();
    let mut surplus: Vec<(OutputOrdinal, Vec<InputHandle>)> = Vec::new();
    // Running count per output, decremented as `moves` assigns work away
    // from it and incremented as work is assigned to it, so a single pass
    // can spread surplus across several undersubscribed outputs.
    let mut counts: Vec<usize> = runqueues.queues.iter().map(|q| q.len()).collect();

    for (ordinal, q) in runqueues.queues.iter().enumerate() {
        if q.len() > target {
            surplus.push((ordinal, q.iter().skip(target).collect()));
        }
    }

    for (from, extra) in surplus {
        for handle in extra {
            if counts[from] <= target {
                break;
            }
            let input = match inputs.get(&handle) {
                Some(i) => i,
                None => continue,
            };
            let to = (0..num_outputs).find(|o| {
                *o != from
                    && counts[*o] < target
                    && (input.bindings.is_empty() || input.bindings.contains(o))
            });
            if let Some(to) = to {
                moves.push((from, handle, to));
                counts[from] -= 1;
                counts[to] += 1;
            }
        }
    }
    moves
}

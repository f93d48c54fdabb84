use tracing::{debug, info, warn};
use tssbridge_types::{
    party_count, Address, BlockNumber, EpochTimeInterval, ExchangeRequest, KeygenCancel, KeygenRequest,
    SignRequest, WorkMessage,
};

use crate::event_processor::ResolvedEvent;
use crate::state::WatcherState;
use crate::tx_recovery::convert_value;

/// Turns replayed bridge events into work for this validator. Every state
/// change is applied whether or not this validator participates; only the
/// emitted messages depend on membership.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    own: Address,
    home_decimals: u32,
    foreign_decimals: u32,
}

impl Dispatcher {
    pub fn new(own: Address, home_decimals: u32, foreign_decimals: u32) -> Self {
        Self {
            own,
            home_decimals,
            foreign_decimals,
        }
    }

    pub fn own_address(&self) -> &Address {
        &self.own
    }

    fn sign_request(state: &mut WatcherState, block: BlockNumber) -> SignRequest {
        SignRequest {
            epoch: state.epoch.id,
            block_number: block,
            nonce: state.take_nonce(state.epoch.id),
            threshold: state.epoch.threshold,
            parties: state.epoch.parties(),
            recipient: None,
            close_epoch: None,
            new_epoch: None,
        }
    }

    /// Whether an exchange since the start of the range ending at `block` still
    /// waits for a signing request.
    fn range_has_pending_exchange(state: &WatcherState, block: BlockNumber) -> bool {
        state.last_transaction_block != 0
            && state.last_transaction_block >= state.range.range_start(block)
    }

    /// Applies `event` at `block` and returns the message it produces, if any.
    pub fn dispatch(
        &self,
        state: &mut WatcherState,
        block: BlockNumber,
        event: ResolvedEvent,
    ) -> Option<WorkMessage> {
        match event {
            ResolvedEvent::NewEpoch {
                old_epoch,
                new_epoch,
                validators,
                threshold,
            } => {
                state.begin_keygen(block, new_epoch);
                if !validators.contains(&self.own) {
                    debug!(block, new_epoch, "not a member of the next epoch");
                    return None;
                }
                let Some(parties) = party_count(&validators) else {
                    warn!(
                        block,
                        new_epoch,
                        size = validators.len(),
                        "validator set too large for keygen"
                    );
                    return None;
                };
                info!(block, old_epoch, new_epoch, threshold, "keygen requested");
                Some(WorkMessage::Keygen(KeygenRequest {
                    epoch: new_epoch,
                    block_number: block,
                    threshold,
                    parties,
                }))
            }

            ResolvedEvent::NewEpochCancelled { epoch, validators } => {
                state.cancel_keygen(block);
                validators.contains(&self.own).then(|| {
                    info!(block, epoch, "keygen cancelled");
                    WorkMessage::KeygenCancel(KeygenCancel {
                        epoch,
                        block_number: block,
                    })
                })
            }

            ResolvedEvent::NewFundsTransfer {
                old_epoch,
                new_epoch,
                recipient,
            } => {
                state.begin_funds_transfer(block, new_epoch);
                if old_epoch != state.epoch.id {
                    warn!(
                        block,
                        old_epoch,
                        local_epoch = state.epoch.id,
                        "funds transfer from an epoch other than the replicated one"
                    );
                }
                let nonce = state.take_nonce(old_epoch);
                if !state.is_current_validator {
                    return None;
                }
                let Some(recipient) = recipient else {
                    warn!(block, new_epoch, "funds transfer without custody address");
                    return None;
                };
                info!(block, old_epoch, new_epoch, nonce, "funds transfer sign request");
                Some(WorkMessage::Sign(SignRequest {
                    epoch: old_epoch,
                    block_number: block,
                    nonce,
                    threshold: state.epoch.threshold,
                    parties: state.epoch.parties(),
                    recipient: Some(recipient),
                    close_epoch: None,
                    new_epoch: Some(new_epoch),
                }))
            }

            ResolvedEvent::Exchange {
                value,
                nonce,
                recipient,
            } => {
                state.last_transaction_block = block;
                if !state.is_current_validator {
                    return None;
                }
                let Some(recipient) = recipient else {
                    warn!(block, request_nonce = nonce, "exchange without requester address");
                    return None;
                };
                let Some(amount) = convert_value(value, self.home_decimals, self.foreign_decimals)
                else {
                    warn!(block, value = %value, "exchange amount does not fit the foreign chain");
                    return None;
                };
                let epoch = state.epoch.id;
                debug!(block, epoch, request_nonce = nonce, amount, "exchange request");
                Some(WorkMessage::Exchange(ExchangeRequest {
                    epoch,
                    block_number: block,
                    recipient,
                    value: amount,
                    nonce: state.pending_nonce(epoch),
                }))
            }

            ResolvedEvent::EpochStart {
                epoch,
                timestamp_ms,
            } => {
                let id = epoch.id;
                state.start_epoch(block, epoch, &self.own);
                info!(
                    block,
                    epoch = id,
                    validator = state.is_current_validator,
                    "epoch started"
                );
                Some(WorkMessage::EpochTimeInterval(EpochTimeInterval {
                    epoch: id,
                    block_number: block,
                    start_time: Some(timestamp_ms),
                    prolonged_time: None,
                }))
            }

            ResolvedEvent::EpochEnd {
                epoch,
                timestamp_ms,
            } => {
                if epoch != state.epoch.id {
                    warn!(
                        block,
                        epoch,
                        local_epoch = state.epoch.id,
                        "end of an epoch other than the replicated one"
                    );
                }
                state.end_epoch(block);
                info!(block, epoch, "epoch ended");
                Some(WorkMessage::EpochTimeInterval(EpochTimeInterval {
                    epoch,
                    block_number: block,
                    start_time: None,
                    prolonged_time: Some(timestamp_ms),
                }))
            }

            ResolvedEvent::EpochClose { epoch } => {
                state.close_epoch(block);
                if epoch != state.epoch.id {
                    warn!(block, epoch, local_epoch = state.epoch.id, "closing an unexpected epoch");
                }
                let nonce = state.take_nonce(epoch);
                state.is_current_validator.then(|| {
                    info!(block, epoch, nonce, "close epoch sign request");
                    WorkMessage::Sign(SignRequest {
                        epoch,
                        block_number: block,
                        nonce,
                        threshold: state.epoch.threshold,
                        parties: state.epoch.parties(),
                        recipient: None,
                        close_epoch: Some(epoch),
                        new_epoch: None,
                    })
                })
            }

            ResolvedEvent::ForceSign => {
                if !Self::range_has_pending_exchange(state, block) {
                    debug!(block, "force sign with nothing pending");
                    return None;
                }
                state.last_transaction_block = 0;
                let request = Self::sign_request(state, block);
                state.is_current_validator.then(|| {
                    info!(block, nonce = request.nonce, "force sign request");
                    WorkMessage::Sign(request)
                })
            }

            ResolvedEvent::RangeSizeChanged { range_size } => {
                info!(block, range_size, "range size changed");
                state.change_range_size(block, range_size);
                None
            }

            ResolvedEvent::Unknown { topic0 } => {
                warn!(
                    block,
                    topic0 = %topic0.map(hex::encode).unwrap_or_default(),
                    "ignoring unknown event"
                );
                None
            }
        }
    }

    /// Runs after all events of `block`: closes the signing range when `block`
    /// is its last block.
    pub fn close_range(&self, state: &mut WatcherState, block: BlockNumber) -> Option<WorkMessage> {
        if !state.range.is_boundary(block) || !Self::range_has_pending_exchange(state, block) {
            return None;
        }
        state.last_transaction_block = 0;
        let request = Self::sign_request(state, block);
        state.is_current_validator.then(|| {
            info!(block, nonce = request.nonce, "range closed, sign request");
            WorkMessage::Sign(request)
        })
    }

    /// Whether a batch without epoch boundary events should report liveness.
    pub fn heartbeat_due(&self, state: &WatcherState) -> bool {
        state.epoch.active && state.epoch.id > 0
    }

    pub fn heartbeat(
        &self,
        state: &WatcherState,
        block: BlockNumber,
        timestamp_ms: u64,
    ) -> Option<WorkMessage> {
        self.heartbeat_due(state).then(|| {
            WorkMessage::EpochTimeInterval(EpochTimeInterval {
                epoch: state.epoch.id,
                block_number: block,
                start_time: None,
                prolonged_time: Some(timestamp_ms),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::RangeAlignment;
    use tssbridge_types::Epoch;

    const A: Address = [0xa; 20];
    const B: Address = [0xb; 20];
    const C: Address = [0xc; 20];
    const OUTSIDER: Address = [0xd; 20];
    const ONE_TOKEN: u128 = 1_000_000_000_000_000_000;

    fn active_epoch_1(own: &Address) -> WatcherState {
        let epoch = Epoch {
            id: 1,
            validators: vec![A, B, C],
            threshold: 2,
            range_size: 3,
            active: true,
            start_block: 100,
        };
        WatcherState::new(100, epoch, RangeAlignment::new(3, 100), own)
    }

    fn exchange(value: u128) -> ResolvedEvent {
        ResolvedEvent::Exchange {
            value,
            nonce: 0,
            recipient: Some("02aa".to_string()),
        }
    }

    /// Replays `events` block by block the way the home watcher does.
    fn replay(
        dispatcher: &Dispatcher,
        state: &mut WatcherState,
        blocks: std::ops::RangeInclusive<u64>,
        events: &[(u64, ResolvedEvent)],
    ) -> Vec<WorkMessage> {
        let mut out = Vec::new();
        for block in blocks {
            for (_, event) in events.iter().filter(|(b, _)| *b == block) {
                out.extend(dispatcher.dispatch(state, block, event.clone()));
            }
            out.extend(dispatcher.close_range(state, block));
        }
        out
    }

    #[test]
    fn test_exchange_nonces_follow_ranges() {
        let dispatcher = Dispatcher::new(A, 18, 8);
        let mut state = active_epoch_1(&A);
        let events = [
            (103, exchange(5 * ONE_TOKEN)),
            (104, exchange(7 * ONE_TOKEN)),
            (106, exchange(ONE_TOKEN)),
        ];
        let out = replay(&dispatcher, &mut state, 100..=108, &events);

        let summary: Vec<_> = out
            .iter()
            .map(|m| match m {
                WorkMessage::Exchange(e) => ("exchange", e.block_number, e.nonce),
                WorkMessage::Sign(s) => ("sign", s.block_number, s.nonce),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("exchange", 103, 0),
                ("exchange", 104, 0),
                ("sign", 105, 0),
                ("exchange", 106, 1),
                ("sign", 108, 1),
            ]
        );
        match &out[0] {
            WorkMessage::Exchange(e) => assert_eq!(e.value, 500_000_000),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_force_sign_prevents_second_attempt_in_range() {
        let dispatcher = Dispatcher::new(A, 18, 8);
        let mut state = active_epoch_1(&A);
        let events = [(103, exchange(ONE_TOKEN)), (104, ResolvedEvent::ForceSign)];
        let out = replay(&dispatcher, &mut state, 103..=105, &events);
        let signs: Vec<_> = out
            .iter()
            .filter_map(|m| match m {
                WorkMessage::Sign(s) => Some(s.block_number),
                _ => None,
            })
            .collect();
        assert_eq!(signs, vec![104]);
        assert_eq!(state.last_transaction_block, 0);
    }

    #[test]
    fn test_empty_range_does_not_sign() {
        let dispatcher = Dispatcher::new(A, 18, 8);
        let mut state = active_epoch_1(&A);
        assert!(replay(&dispatcher, &mut state, 100..=120, &[]).is_empty());
        assert!(dispatcher
            .dispatch(&mut state, 121, ResolvedEvent::ForceSign)
            .is_none());
    }

    #[test]
    fn test_outsider_keeps_identical_state() {
        let events = [
            (103, exchange(ONE_TOKEN)),
            (
                104,
                ResolvedEvent::NewEpoch {
                    old_epoch: 1,
                    new_epoch: 2,
                    validators: vec![A, B],
                    threshold: 1,
                },
            ),
            (106, ResolvedEvent::EpochClose { epoch: 1 }),
        ];

        let member = Dispatcher::new(A, 18, 8);
        let mut member_state = active_epoch_1(&A);
        let member_out = replay(&member, &mut member_state, 100..=107, &events);

        let outsider = Dispatcher::new(OUTSIDER, 18, 8);
        let mut outsider_state = active_epoch_1(&OUTSIDER);
        let outsider_out = replay(&outsider, &mut outsider_state, 100..=107, &events);

        assert!(member_out.len() >= 4);
        assert!(outsider_out.is_empty());

        outsider_state.is_current_validator = true;
        assert_eq!(outsider_state, member_state);
    }

    #[test]
    fn test_keygen_membership_uses_next_epoch() {
        // not in the current set but part of the next one
        let dispatcher = Dispatcher::new(OUTSIDER, 18, 8);
        let mut state = active_epoch_1(&OUTSIDER);
        let msg = dispatcher.dispatch(
            &mut state,
            150,
            ResolvedEvent::NewEpoch {
                old_epoch: 1,
                new_epoch: 2,
                validators: vec![A, OUTSIDER],
                threshold: 1,
            },
        );
        assert_eq!(
            msg,
            Some(WorkMessage::Keygen(KeygenRequest {
                epoch: 2,
                block_number: 150,
                threshold: 1,
                parties: 2,
            }))
        );

        let cancel = dispatcher.dispatch(
            &mut state,
            151,
            ResolvedEvent::NewEpochCancelled {
                epoch: 2,
                validators: vec![A, OUTSIDER],
            },
        );
        assert!(matches!(cancel, Some(WorkMessage::KeygenCancel(_))));
    }

    #[test]
    fn test_oversized_validator_set_requests_no_keygen() {
        let dispatcher = Dispatcher::new(A, 18, 8);
        let mut state = active_epoch_1(&A);
        let mut expected = state.clone();
        expected.begin_keygen(150, 2);

        let mut validators = vec![B; 65_536];
        validators[0] = A;
        let msg = dispatcher.dispatch(
            &mut state,
            150,
            ResolvedEvent::NewEpoch {
                old_epoch: 1,
                new_epoch: 2,
                validators,
                threshold: 2,
            },
        );
        assert_eq!(msg, None);
        assert_eq!(state, expected);
    }

    #[test]
    fn test_funds_transfer_consumes_old_epoch_nonce() {
        let dispatcher = Dispatcher::new(A, 18, 8);
        let mut state = active_epoch_1(&A);
        state.take_nonce(1);
        let msg = dispatcher.dispatch(
            &mut state,
            200,
            ResolvedEvent::NewFundsTransfer {
                old_epoch: 1,
                new_epoch: 2,
                recipient: Some("03bb".to_string()),
            },
        );
        match msg {
            Some(WorkMessage::Sign(s)) => {
                assert_eq!(s.epoch, 1);
                assert_eq!(s.nonce, 1);
                assert_eq!(s.new_epoch, Some(2));
                assert_eq!(s.recipient.as_deref(), Some("03bb"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(state.pending_nonce(1), 2);
    }

    #[test]
    fn test_epoch_intervals_are_always_emitted() {
        let dispatcher = Dispatcher::new(OUTSIDER, 18, 8);
        let mut state = active_epoch_1(&OUTSIDER);
        let end = dispatcher.dispatch(
            &mut state,
            300,
            ResolvedEvent::EpochEnd {
                epoch: 1,
                timestamp_ms: 9_000,
            },
        );
        assert_eq!(
            end,
            Some(WorkMessage::EpochTimeInterval(EpochTimeInterval {
                epoch: 1,
                block_number: 300,
                start_time: None,
                prolonged_time: Some(9_000),
            }))
        );
        assert!(!dispatcher.heartbeat_due(&state));

        let next = Epoch {
            id: 2,
            validators: vec![A, OUTSIDER],
            threshold: 1,
            ..Default::default()
        };
        let start = dispatcher.dispatch(
            &mut state,
            310,
            ResolvedEvent::EpochStart {
                epoch: next,
                timestamp_ms: 10_000,
            },
        );
        assert!(matches!(
            start,
            Some(WorkMessage::EpochTimeInterval(EpochTimeInterval {
                epoch: 2,
                start_time: Some(10_000),
                ..
            }))
        ));
        assert!(state.is_current_validator);
        assert_eq!(state.range, RangeAlignment::new(3, 310));
        assert!(dispatcher.heartbeat(&state, 315, 11_000).is_some());
    }
}

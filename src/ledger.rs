//! C3: the wagering ledger. Three atomic, idempotent operations against
//! user balances and an append-only transaction log (§4.3).

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::rules::WinType;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionKind {
    Stake,
    Payout,
    Penalty,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: String,
    pub user_id: String,
    pub table_id: String,
    pub game_id: String,
    pub kind: TransactionKind,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub win_type: Option<WinType>,
    pub status: TransactionStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A seat's identity and current balance as the ledger needs it; the
/// session layer maps its own `Seat` into this before calling in, so C3
/// never depends on C6's types (topological order, design note).
#[derive(Clone, Debug)]
pub struct LedgerSeat {
    pub user_id: String,
    pub is_human: bool,
}

/// In-memory balances + append-only transaction log, keyed for
/// idempotent replay by transaction id (§4.3 "Idempotency"). Bots never
/// touch the ledger — callers filter seats by `is_human` before calling.
#[derive(Clone, Default)]
pub struct Ledger {
    balances: Arc<DashMap<String, i64>>,
    transactions: Arc<DashMap<String, LedgerTransaction>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, user_id: &str) -> i64 {
        self.balances.get(user_id).map(|b| *b).unwrap_or(0)
    }

    pub fn credit_new_user(&self, user_id: &str, starting_chips: i64) {
        self.balances.entry(user_id.to_string()).or_insert(starting_chips);
    }

    fn apply_delta(
        &self,
        id: String,
        user_id: &str,
        table_id: &str,
        game_id: &str,
        kind: TransactionKind,
        amount: i64,
        win_type: Option<WinType>,
    ) -> Result<LedgerTransaction, LedgerError> {
        if let Some(existing) = self.transactions.get(&id) {
            info!(id = %id, "ledger transaction replayed, no-op");
            return Ok(existing.clone());
        }

        let mut balance_ref = self
            .balances
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::UnknownUser(user_id.to_string()))?;
        let before = *balance_ref;
        let after = before + amount;
        if after < 0 {
            drop(balance_ref);
            let failed = LedgerTransaction {
                id: id.clone(),
                user_id: user_id.to_string(),
                table_id: table_id.to_string(),
                game_id: game_id.to_string(),
                kind,
                amount,
                balance_before: before,
                balance_after: before,
                win_type,
                status: TransactionStatus::Failed,
                timestamp: chrono::Utc::now(),
            };
            self.transactions.insert(id, failed);
            return Err(LedgerError::InsufficientBalance {
                user_id: user_id.to_string(),
                balance: before,
                needed: -amount,
            });
        }
        *balance_ref = after;
        drop(balance_ref);

        let txn = LedgerTransaction {
            id: id.clone(),
            user_id: user_id.to_string(),
            table_id: table_id.to_string(),
            game_id: game_id.to_string(),
            kind,
            amount,
            balance_before: before,
            balance_after: after,
            win_type,
            status: TransactionStatus::Completed,
            timestamp: chrono::Utc::now(),
        };
        self.transactions.insert(id, txn.clone());
        Ok(txn)
    }

    /// Deducts `stake` from every human seat at hand start. Atomic
    /// across the whole batch: any failure rolls the batch back and
    /// none of the deductions are retained (§4.3 "Failure modes").
    pub fn deduct_stakes(
        &self,
        seats: &[LedgerSeat],
        stake: u64,
        table_id: &str,
        game_id: &str,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let mut applied = Vec::new();
        for seat in seats.iter().filter(|s| s.is_human) {
            let id = format!("{game_id}:stake:{}", seat.user_id);
            match self.apply_delta(
                id,
                &seat.user_id,
                table_id,
                game_id,
                TransactionKind::Stake,
                -(stake as i64),
                None,
            ) {
                Ok(txn) => applied.push(txn),
                Err(e) => {
                    warn!(error = %e, "stake deduction failed, rolling back batch");
                    self.rollback(&applied);
                    return Err(e);
                }
            }
        }
        Ok(applied)
    }

    fn rollback(&self, applied: &[LedgerTransaction]) {
        for txn in applied {
            if let Some(mut balance) = self.balances.get_mut(&txn.user_id) {
                *balance -= txn.amount;
            }
            if let Some(mut row) = self.transactions.get_mut(&txn.id) {
                row.status = TransactionStatus::RolledBack;
            }
        }
    }

    /// Payout formula per §4.3's table: winners split `payout`, losers
    /// get nothing (they already forfeited their stake at hand start).
    pub fn distribute_winnings(
        &self,
        seats: &[LedgerSeat],
        winners: &[usize],
        win_type: WinType,
        stake: u64,
        table_id: &str,
        game_id: &str,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let pot = stake * seats.len() as u64;
        let per_winner = match win_type {
            WinType::Reem | WinType::DropWin | WinType::ForfeitWin => pot,
            WinType::Immediate50 => 2 * pot,
            WinType::SpecialWin => 3 * pot,
            WinType::RegularWin | WinType::StockEmpty => {
                if winners.is_empty() {
                    0
                } else {
                    pot / winners.len() as u64
                }
            }
            WinType::DropCaught => pot, // winners paid via apply_drop_penalty instead
        };

        let mut applied = Vec::new();
        for &idx in winners {
            let seat = &seats[idx];
            if !seat.is_human || per_winner == 0 {
                continue;
            }
            let id = format!("{game_id}:payout:{}", seat.user_id);
            let txn = self.apply_delta(
                id,
                &seat.user_id,
                table_id,
                game_id,
                TransactionKind::Payout,
                per_winner as i64,
                Some(win_type),
            )?;
            applied.push(txn);
        }
        Ok(applied)
    }

    /// `DROP_CAUGHT`: the dropper pays an extra `stake` to every seat
    /// whose score is strictly below the dropper's (§4.3).
    pub fn apply_drop_penalty(
        &self,
        seats: &[LedgerSeat],
        dropper_idx: usize,
        round_scores: &[u32],
        stake: u64,
        table_id: &str,
        game_id: &str,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let dropper_score = round_scores[dropper_idx];
        let beneficiaries: Vec<usize> = round_scores
            .iter()
            .enumerate()
            .filter(|(i, &s)| *i != dropper_idx && s < dropper_score)
            .map(|(i, _)| i)
            .collect();

        let mut applied = Vec::new();
        let dropper = &seats[dropper_idx];
        if dropper.is_human {
            for &idx in &beneficiaries {
                let id = format!("{game_id}:penalty:{}:{}", dropper.user_id, seats[idx].user_id);
                let txn = self.apply_delta(
                    id,
                    &dropper.user_id,
                    table_id,
                    game_id,
                    TransactionKind::Penalty,
                    -(stake as i64),
                    Some(WinType::DropCaught),
                )?;
                applied.push(txn);
            }
        }
        for &idx in &beneficiaries {
            let seat = &seats[idx];
            if !seat.is_human {
                continue;
            }
            let id = format!("{game_id}:penalty-credit:{}", seat.user_id);
            let txn = self.apply_delta(
                id,
                &seat.user_id,
                table_id,
                game_id,
                TransactionKind::Payout,
                stake as i64,
                Some(WinType::DropCaught),
            )?;
            applied.push(txn);
        }
        Ok(applied)
    }

    pub fn new_transaction_id(prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seats(n: usize) -> Vec<LedgerSeat> {
        (0..n)
            .map(|i| LedgerSeat {
                user_id: format!("user-{i}"),
                is_human: true,
            })
            .collect()
    }

    #[test]
    fn idempotent_payout_replay_does_not_change_balances() {
        let ledger = Ledger::new();
        let seats = seats(2);
        for s in &seats {
            ledger.credit_new_user(&s.user_id, 100);
        }
        ledger
            .distribute_winnings(&seats, &[0], WinType::Reem, 10, "t1", "g1")
            .unwrap();
        let after_first = ledger.balance("user-0");
        ledger
            .distribute_winnings(&seats, &[0], WinType::Reem, 10, "t1", "g1")
            .unwrap();
        assert_eq!(ledger.balance("user-0"), after_first);
    }

    #[test]
    fn deduct_stakes_rolls_back_whole_batch_on_insufficient_funds() {
        let ledger = Ledger::new();
        let seats = seats(2);
        ledger.credit_new_user("user-0", 100);
        ledger.credit_new_user("user-1", 2);
        let err = ledger.deduct_stakes(&seats, 10, "t1", "g1").unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.balance("user-0"), 100, "rollback must restore seat 0");
    }

    #[test]
    fn drop_caught_penalty_moves_stake_between_seats() {
        let ledger = Ledger::new();
        let seats = seats(3);
        for s in &seats {
            ledger.credit_new_user(&s.user_id, 100);
        }
        ledger
            .apply_drop_penalty(&seats, 0, &[6, 3, 4], 10, "t1", "g1")
            .unwrap();
        assert_eq!(ledger.balance("user-0"), 80);
        assert_eq!(ledger.balance("user-1"), 110);
        assert_eq!(ledger.balance("user-2"), 110);
    }

    #[test]
    fn regular_win_splits_pot_among_tied_winners() {
        let ledger = Ledger::new();
        let seats = seats(2);
        for s in &seats {
            ledger.credit_new_user(&s.user_id, 100);
        }
        ledger
            .distribute_winnings(&seats, &[0, 1], WinType::StockEmpty, 5, "t1", "g1")
            .unwrap();
        assert_eq!(ledger.balance("user-0"), 105);
        assert_eq!(ledger.balance("user-1"), 105);
    }
}

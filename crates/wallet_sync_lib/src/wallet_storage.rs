//! Persisted transaction history, balance snapshots and the calculated balance history.
//!
//! The calculated history walks the transaction list backward from the current
//! balance. Gas spent by outgoing transactions is not modelled, so older points
//! of an active sender drift from the real historical balance.

use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::str::FromStr;

use crate::db::model::CalculatedHistoryDao;
use crate::db::ops::*;
use crate::err_from;
use crate::error::SyncError;
use crate::model::{BalanceHistoryPoint, Transaction, TxStatus};
use crate::utils::parse_decimal;

lazy_static::lazy_static! {
    static ref BALANCE_EPSILON: Decimal = Decimal::from_str("0.000001").unwrap_or_default();
}

fn storage_key(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Merges by hash (case-insensitive), new rows win; result is newest first with lower-cased hashes.
pub fn merge_transactions(existing: &[Transaction], new: &[Transaction]) -> Vec<Transaction> {
    let mut by_hash: HashMap<String, Transaction> = HashMap::new();
    for tx in existing.iter().chain(new.iter()) {
        let mut tx = tx.clone();
        tx.hash = tx.hash.to_lowercase();
        by_hash.insert(tx.hash.clone(), tx);
    }
    let mut merged: Vec<Transaction> = by_hash.into_values().collect();
    sort_newest_first(&mut merged);
    merged
}

fn sort_newest_first(txs: &mut [Transaction]) {
    txs.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then(b.block_number.cmp(&a.block_number))
            .then(a.hash.cmp(&b.hash))
    });
}

/// False when the two balances differ by less than 0.000001; unparsable input counts as changed.
pub fn has_balance_changed(old_balance: &str, new_balance: &str) -> bool {
    match (parse_decimal(old_balance), parse_decimal(new_balance)) {
        (Ok(old), Ok(new)) => (old - new).abs() >= *BALANCE_EPSILON,
        _ => true,
    }
}

/// Signed effect of a transaction on the queried address' balance.
fn balance_delta(tx: &Transaction) -> Decimal {
    match tx.status {
        TxStatus::Success => {
            let value = parse_decimal(&tx.value).unwrap_or_else(|err| {
                log::warn!("Ignoring unparsable value of tx {}: {}", tx.hash, err);
                Decimal::ZERO
            });
            if tx.is_incoming {
                value
            } else {
                -value
            }
        }
        TxStatus::Failed | TxStatus::Pending | TxStatus::SelfTransfer => Decimal::ZERO,
    }
}

fn clamp_non_negative(value: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        value
    }
}

/// Reconstructs balance points (oldest first) ending with `(now, current_balance)`.
///
/// Gas paid by outgoing transactions is not added back, so older points of
/// an active sender read lower than the true balance.
pub fn calculate_balance_history_from_transactions(
    address: &str,
    current_balance: &str,
    transactions: &[Transaction],
    now: i64,
) -> Vec<BalanceHistoryPoint> {
    let address = storage_key(address);
    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut running = parse_decimal(current_balance).unwrap_or_else(|err| {
        log::warn!("Invalid current balance {}: {}", current_balance, err);
        Decimal::ZERO
    });
    running = clamp_non_negative(running);

    let mut points = Vec::with_capacity(sorted.len() + 1);
    for tx in sorted {
        points.push(BalanceHistoryPoint {
            timestamp: tx.timestamp,
            balance: running.to_string(),
            address: address.clone(),
        });
        running = clamp_non_negative(running - balance_delta(tx));
    }
    points.reverse();
    points.push(BalanceHistoryPoint {
        timestamp: now,
        balance: current_balance.to_string(),
        address,
    });
    points
}

pub async fn get_transactions(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<Vec<Transaction>, SyncError> {
    let rows = get_tx_history(conn, &storage_key(address), None)
        .await
        .map_err(err_from!())?;
    rows.iter().map(Transaction::from_dao).collect()
}

/// Merges `new` into the stored list of `address` and returns the merged list.
pub async fn save_transactions(
    conn: &mut SqliteConnection,
    address: &str,
    new: &[Transaction],
) -> Result<Vec<Transaction>, SyncError> {
    let key = storage_key(address);
    let existing = get_transactions(conn, &key).await?;
    let merged = merge_transactions(&existing, new);
    for tx in new {
        upsert_tx_history(conn, &tx.to_dao(&key))
            .await
            .map_err(err_from!())?;
    }
    Ok(merged)
}

/// Highest block already stored, the next explorer fetch can start there.
pub async fn get_last_synced_block(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<Option<u64>, SyncError> {
    let max_block = get_max_tx_block(conn, &storage_key(address))
        .await
        .map_err(err_from!())?;
    Ok(max_block.map(|b| b.max(0) as u64))
}

pub async fn add_balance_snapshot(
    conn: &mut SqliteConnection,
    address: &str,
    balance: &str,
    timestamp: i64,
) -> Result<BalanceHistoryPoint, SyncError> {
    let key = storage_key(address);
    let row = insert_balance_snapshot(conn, &key, timestamp, balance)
        .await
        .map_err(err_from!())?;
    Ok(BalanceHistoryPoint {
        timestamp: row.timestamp,
        balance: row.balance,
        address: row.address,
    })
}

pub async fn get_balance_history(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<Vec<BalanceHistoryPoint>, SyncError> {
    let rows = get_balance_snapshots(conn, &storage_key(address))
        .await
        .map_err(err_from!())?;
    Ok(rows
        .into_iter()
        .map(|row| BalanceHistoryPoint {
            timestamp: row.timestamp,
            balance: row.balance,
            address: row.address,
        })
        .collect())
}

/// Returns the stored reconstruction unless the balance or the transaction count changed.
pub async fn get_calculated_balance_history(
    conn: &mut SqliteConnection,
    address: &str,
    current_balance: &str,
    transactions: &[Transaction],
    now: i64,
) -> Result<Vec<BalanceHistoryPoint>, SyncError> {
    let key = storage_key(address);
    if let Some(stored) = get_calculated_history(conn, &key)
        .await
        .map_err(err_from!())?
    {
        let same_count = stored.tx_count == transactions.len() as i64;
        if same_count && !has_balance_changed(&stored.balance, current_balance) {
            match serde_json::from_str::<Vec<BalanceHistoryPoint>>(&stored.points) {
                Ok(points) => {
                    log::debug!("Reusing calculated balance history of {}", key);
                    return Ok(points);
                }
                Err(err) => {
                    log::warn!("Stored balance history of {} is unreadable: {}", key, err);
                }
            }
        }
    }

    let points =
        calculate_balance_history_from_transactions(&key, current_balance, transactions, now);
    save_calculated_history(
        conn,
        &CalculatedHistoryDao {
            address: key.clone(),
            points: serde_json::to_string(&points)?,
            balance: current_balance.to_string(),
            tx_count: transactions.len() as i64,
            computed_at: now,
        },
    )
    .await
    .map_err(err_from!())?;
    log::debug!(
        "Recalculated balance history of {} from {} transactions",
        key,
        transactions.len()
    );
    Ok(points)
}

pub async fn clear_wallet_data(conn: &mut SqliteConnection, address: &str) -> Result<(), SyncError> {
    let key = storage_key(address);
    delete_tx_history(conn, &key).await.map_err(err_from!())?;
    delete_balance_snapshots(conn, &key)
        .await
        .map_err(err_from!())?;
    delete_calculated_history(conn, &key)
        .await
        .map_err(err_from!())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(hash: &str, value: &str, incoming: bool, timestamp: i64) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            from: "0xfrom".to_string(),
            to: Some("0xto".to_string()),
            value: value.to_string(),
            timestamp,
            block_number: timestamp as u64,
            status: TxStatus::Success,
            is_incoming: incoming,
            gas_used: None,
            gas_price: None,
        }
    }

    #[test]
    fn test_single_incoming_transaction() {
        let txs = vec![tx("0xA", "1.0", true, 100)];
        let points = calculate_balance_history_from_transactions("0xAbc", "1.0", &txs, 500);
        assert_eq!(points.len(), 2);
        assert_eq!((points[0].timestamp, points[0].balance.as_str()), (100, "1.0"));
        assert_eq!((points[1].timestamp, points[1].balance.as_str()), (500, "1.0"));
        assert_eq!(points[0].address, "0xabc");
    }

    #[test]
    fn test_reconstruction_walks_backward() {
        let txs = vec![
            tx("0x1", "2", true, 100),
            tx("0x3", "1", true, 300),
            tx("0x2", "0.5", false, 200),
        ];
        let points = calculate_balance_history_from_transactions("0xabc", "2.5", &txs, 400);
        let balances: Vec<(i64, &str)> = points
            .iter()
            .map(|p| (p.timestamp, p.balance.as_str()))
            .collect();
        assert_eq!(
            balances,
            vec![(100, "2.0"), (200, "1.5"), (300, "2.5"), (400, "2.5")]
        );
    }

    #[test]
    fn test_reconstruction_clamps_at_zero() {
        let txs = vec![tx("0x1", "5", true, 100), tx("0x2", "3", true, 200)];
        let points = calculate_balance_history_from_transactions("0xabc", "1", &txs, 300);
        assert!(points
            .iter()
            .all(|p| !Decimal::from_str(&p.balance).unwrap().is_sign_negative()));
        assert_eq!(points.last().unwrap().balance, "1");
        assert_eq!(points[0].balance, "0");
    }

    #[test]
    fn test_failed_transactions_do_not_move_balance() {
        let mut failed = tx("0x1", "5", false, 100);
        failed.status = TxStatus::Failed;
        let points = calculate_balance_history_from_transactions("0xabc", "1", &[failed], 300);
        assert_eq!(points[0].balance, "1");
    }

    #[test]
    fn test_merge_overwrites_and_is_idempotent() {
        let a = vec![tx("0x1", "1", true, 100), tx("0x2", "1", true, 200)];
        let mut updated = tx("0x2", "7", true, 200);
        updated.status = TxStatus::Failed;
        let b = vec![updated.clone(), tx("0x3", "1", false, 300)];
        let merged = merge_transactions(&a, &b);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].hash, "0x3");
        assert_eq!(merged[1], updated);
        assert_eq!(merge_transactions(&merged, &b), merged);
    }

    #[test]
    fn test_merge_lowercases_hashes() {
        let merged = merge_transactions(&[tx("0xab", "1", true, 100)], &[tx("0xAB", "2", true, 100)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].hash, "0xab");
        assert_eq!(merged[0].value, "2");
    }

    #[test]
    fn test_has_balance_changed() {
        assert!(!has_balance_changed("1.0", "1.0000005"));
        assert!(has_balance_changed("1.0", "1.000001"));
        assert!(has_balance_changed("2", "1"));
        assert!(!has_balance_changed("0", ""));
        assert!(has_balance_changed("abc", "1"));
    }
}

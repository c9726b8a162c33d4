use crate::db::model::*;
use sqlx::SqliteConnection;

/// Inserts or replaces a transaction row; the newer row wins on hash collision.
pub async fn upsert_tx_history(
    conn: &mut SqliteConnection,
    tx: &TxHistoryDao,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"INSERT OR REPLACE INTO tx_history
(address, tx_hash, from_addr, to_addr, val, timestamp, block_number, status, is_incoming, gas_used, gas_price)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
",
    )
    .bind(&tx.address)
    .bind(&tx.tx_hash)
    .bind(&tx.from_addr)
    .bind(&tx.to_addr)
    .bind(&tx.val)
    .bind(tx.timestamp)
    .bind(tx.block_number)
    .bind(&tx.status)
    .bind(tx.is_incoming)
    .bind(&tx.gas_used)
    .bind(&tx.gas_price)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_tx_history(
    conn: &mut SqliteConnection,
    address: &str,
    limit: Option<i64>,
) -> Result<Vec<TxHistoryDao>, sqlx::Error> {
    let limit = limit.unwrap_or(i64::MAX);
    let rows = sqlx::query_as::<_, TxHistoryDao>(
        r"SELECT * FROM tx_history WHERE address = $1
ORDER BY timestamp DESC, block_number DESC, tx_hash ASC LIMIT $2",
    )
    .bind(address)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn get_max_tx_block(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<Option<i64>, sqlx::Error> {
    let max_block = sqlx::query_scalar::<_, Option<i64>>(
        r"SELECT MAX(block_number) FROM tx_history WHERE address = $1",
    )
    .bind(address)
    .fetch_one(conn)
    .await?;
    Ok(max_block)
}

pub async fn delete_tx_history(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(r"DELETE FROM tx_history WHERE address = $1")
        .bind(address)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_balance_snapshot(
    conn: &mut SqliteConnection,
    address: &str,
    timestamp: i64,
    balance: &str,
) -> Result<BalanceSnapshotDao, sqlx::Error> {
    let res = sqlx::query_as::<_, BalanceSnapshotDao>(
        r"INSERT INTO balance_snapshot
(address, timestamp, balance)
VALUES ($1, $2, $3) RETURNING *;
",
    )
    .bind(address)
    .bind(timestamp)
    .bind(balance)
    .fetch_one(conn)
    .await?;
    Ok(res)
}

pub async fn get_balance_snapshots(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<Vec<BalanceSnapshotDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BalanceSnapshotDao>(
        r"SELECT * FROM balance_snapshot WHERE address = $1 ORDER BY timestamp ASC, id ASC",
    )
    .bind(address)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn delete_balance_snapshots(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(r"DELETE FROM balance_snapshot WHERE address = $1")
        .bind(address)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get_calculated_history(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<Option<CalculatedHistoryDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, CalculatedHistoryDao>(
        r"SELECT * FROM calculated_balance_history WHERE address = $1",
    )
    .bind(address)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn save_calculated_history(
    conn: &mut SqliteConnection,
    history: &CalculatedHistoryDao,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"INSERT OR REPLACE INTO calculated_balance_history
(address, points, balance, tx_count, computed_at)
VALUES ($1, $2, $3, $4, $5)
",
    )
    .bind(&history.address)
    .bind(&history.points)
    .bind(&history.balance)
    .bind(history.tx_count)
    .bind(history.computed_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn delete_calculated_history(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(r"DELETE FROM calculated_balance_history WHERE address = $1")
        .bind(address)
        .execute(conn)
        .await?;
    Ok(())
}

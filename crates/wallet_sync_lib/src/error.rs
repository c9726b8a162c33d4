use std::sync::Arc;
use thiserror::Error;
use web3::ethabi::ethereum_types::FromDecStrErr;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Hex conversion error: {0}")]
    HexError(#[from] rustc_hex::FromHexError),
    #[error("Dec conversion error: {0}")]
    DecError(#[from] FromDecStrErr),
    #[error("sqlx error: {0}")]
    SqlxError(#[from] sqlx::Error),
    #[error("sqlx migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("conversion error: {0}")]
    ConversionError(#[from] crate::utils::ConversionError),
    #[error("web3 error: {0}")]
    Web3Error(#[from] web3::Error),
    #[error("abi error: {0}")]
    Web3AbiError(#[from] web3::ethabi::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Transaction history is unavailable: {0}")]
    ExplorerDisabled(String),
    #[error("Explorer error: {0}")]
    ExplorerError(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("{0}")]
    Shared(Arc<SyncError>),
    #[error("Parsing error: {0}")]
    ParsingError(String),
    #[error("Other error: {0}")]
    OtherError(String),
}

impl SyncError {
    /// True when the node (or a proxy in front of it) refused the call with HTTP 429.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            SyncError::RateLimited(_) => true,
            SyncError::Shared(inner) => inner.is_rate_limited(),
            SyncError::Web3Error(web3::Error::Transport(web3::error::TransportError::Code(
                code,
            ))) => *code == 429,
            SyncError::HttpError(err) => {
                err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS)
            }
            other => message_is_rate_limit(&other.to_string()),
        }
    }

    /// True when the node executed the call and the contract reverted it.
    ///
    /// Connection failures and server errors are not reverts.
    pub fn is_revert(&self) -> bool {
        match self {
            SyncError::Shared(inner) => inner.is_revert(),
            SyncError::Web3Error(web3::Error::Rpc(err)) if err.code.code() == 3 => true,
            SyncError::Web3Error(web3::Error::Rpc(_)) | SyncError::OtherError(_) => {
                let msg = self.to_string().to_lowercase();
                msg.contains("execution reverted") || msg.contains("nonexistent token")
            }
            _ => false,
        }
    }
}

fn message_is_rate_limit(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("429") || msg.contains("too many requests") || msg.contains("rate limit")
}

const REVERT_TRANSLATIONS: &[(&str, &str)] = &[
    ("caller is not token owner", "You are not the owner of this token"),
    ("not token owner", "You are not the owner of this token"),
    ("not the owner", "You are not the owner of this token"),
    ("invalid token id", "This token does not exist"),
    ("owner query for nonexistent token", "This token does not exist"),
    ("not the borrower", "Only the borrower can perform this action"),
    ("not borrower", "Only the borrower can perform this action"),
    ("not the lender", "Only the lender can perform this action"),
    ("not lender", "Only the lender can perform this action"),
    ("insufficient funds", "Insufficient funds to cover value and gas"),
    ("user rejected", "The transaction was rejected"),
];

/// Maps a contract revert reason to text that can be shown to a user as is.
pub fn friendly_revert_message(err: &SyncError) -> String {
    if err.is_rate_limited() {
        return "The network is busy, please try again in a moment".to_string();
    }
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    for (needle, friendly) in REVERT_TRANSLATIONS {
        if lower.contains(needle) {
            return friendly.to_string();
        }
    }
    msg
}

#[macro_export]
macro_rules! err_custom_create {
    ($($arg:tt)*) => {
        $crate::error::SyncError::OtherError(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! err_from {
    () => {
        |e| {
            let err = $crate::error::SyncError::from(e);
            log::trace!("{}:{} {}", file!(), line!(), err);
            err
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_detection() {
        let err = SyncError::Web3Error(web3::Error::Transport(
            web3::error::TransportError::Code(429),
        ));
        assert!(err.is_rate_limited());
        let err = SyncError::Web3Error(web3::Error::Transport(
            web3::error::TransportError::Code(500),
        ));
        assert!(!err.is_rate_limited());
        let err = SyncError::OtherError("Too Many Requests".to_string());
        assert!(err.is_rate_limited());
        let err = SyncError::Shared(Arc::new(SyncError::RateLimited("x".to_string())));
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_revert_detection() {
        let err = SyncError::OtherError("execution reverted: ERC721: invalid token ID".to_string());
        assert!(err.is_revert());
        assert!(SyncError::Shared(Arc::new(err)).is_revert());
        assert!(!SyncError::Web3Error(web3::Error::Unreachable).is_revert());
        let err = SyncError::Web3Error(web3::Error::Transport(
            web3::error::TransportError::Code(502),
        ));
        assert!(!err.is_revert());
        assert!(!SyncError::OtherError("node unavailable".to_string()).is_revert());
    }

    #[test]
    fn test_friendly_revert_message() {
        let err = SyncError::OtherError(
            "execution reverted: ERC721: caller is not token owner or approved".to_string(),
        );
        assert_eq!(friendly_revert_message(&err), "You are not the owner of this token");
        let err = SyncError::OtherError("execution reverted: Not the lender".to_string());
        assert_eq!(
            friendly_revert_message(&err),
            "Only the lender can perform this action"
        );
        let err = SyncError::OtherError("something else".to_string());
        assert_eq!(friendly_revert_message(&err), "Other error: something else");
    }
}

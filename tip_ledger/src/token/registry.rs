//! In-memory token registry loaded once from the store.

use super::models::Token;
use crate::db::TokenRepository;
use crate::ledger::{LedgerError, LedgerResult, TokenId};
use std::collections::HashMap;

/// Read-only lookup of token reference data
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    by_id: HashMap<TokenId, Token>,
    by_symbol: HashMap<String, TokenId>,
}

impl TokenRegistry {
    /// Build a registry from a fixed list of tokens
    pub fn from_tokens(tokens: impl IntoIterator<Item = Token>) -> Self {
        let mut registry = Self::default();
        for token in tokens {
            registry
                .by_symbol
                .insert(token.symbol.to_uppercase(), token.id);
            registry.by_id.insert(token.id, token);
        }
        registry
    }

    /// Load every token from the repository
    pub async fn load(repository: &dyn TokenRepository) -> LedgerResult<Self> {
        let tokens = repository.list_tokens().await?;
        log::info!("Loaded {} token(s) into the registry", tokens.len());
        Ok(Self::from_tokens(tokens))
    }

    /// Look up a token by id
    pub fn get(&self, token_id: TokenId) -> LedgerResult<&Token> {
        self.by_id
            .get(&token_id)
            .ok_or_else(|| LedgerError::UnknownToken(token_id.to_string()))
    }

    /// Look up a token by id, failing if it is disabled
    pub fn get_active(&self, token_id: TokenId) -> LedgerResult<&Token> {
        let token = self.get(token_id)?;
        if !token.is_active {
            return Err(LedgerError::InactiveToken(token.symbol.clone()));
        }
        Ok(token)
    }

    /// Case-insensitive lookup by ticker symbol
    pub fn by_symbol(&self, symbol: &str) -> LedgerResult<&Token> {
        self.by_symbol
            .get(&symbol.trim().to_uppercase())
            .and_then(|id| self.by_id.get(id))
            .ok_or_else(|| LedgerError::UnknownToken(symbol.to_string()))
    }

    /// All tokens, ordered by id
    pub fn tokens(&self) -> Vec<&Token> {
        let mut tokens: Vec<&Token> = self.by_id.values().collect();
        tokens.sort_by_key(|t| t.id);
        tokens
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::NewToken;
    use async_trait::async_trait;

    fn token(id: TokenId, symbol: &str, active: bool) -> Token {
        Token {
            id,
            contract_address: format!("0x{symbol}"),
            symbol: symbol.to_string(),
            decimals: 6,
            is_active: active,
            tip_fee_bps: None,
            min_withdraw: None,
            max_withdraw: None,
            daily_withdraw_cap: None,
        }
    }

    struct FixedRepository(Vec<Token>);

    #[async_trait]
    impl TokenRepository for FixedRepository {
        async fn list_tokens(&self) -> LedgerResult<Vec<Token>> {
            Ok(self.0.clone())
        }

        async fn find_by_id(&self, token_id: TokenId) -> LedgerResult<Option<Token>> {
            Ok(self.0.iter().find(|t| t.id == token_id).cloned())
        }

        async fn insert_token(&self, _token: &NewToken) -> LedgerResult<Token> {
            unimplemented!("read-only fixture")
        }

        async fn set_active(&self, _token_id: TokenId, _active: bool) -> LedgerResult<()> {
            unimplemented!("read-only fixture")
        }
    }

    #[tokio::test]
    async fn test_load_from_repository() {
        let repo = FixedRepository(vec![token(1, "PENGU", true), token(2, "USDC", true)]);
        let registry = TokenRegistry::load(&repo).await.unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.by_symbol("usdc").unwrap().id, 2);
    }

    #[test]
    fn test_lookup_errors() {
        let registry = TokenRegistry::from_tokens([token(1, "PENGU", true), token(2, "OLD", false)]);
        assert!(matches!(registry.get(9), Err(LedgerError::UnknownToken(_))));
        assert!(matches!(
            registry.get_active(2),
            Err(LedgerError::InactiveToken(_))
        ));
        assert!(registry.get_active(1).is_ok());
        assert!(registry.by_symbol("nope").is_err());
    }

    #[test]
    fn test_tokens_sorted_by_id() {
        let registry = TokenRegistry::from_tokens([token(3, "C", true), token(1, "A", true)]);
        let ids: Vec<_> = registry.tokens().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}

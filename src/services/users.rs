use rust_decimal::Decimal;

use crate::context::RequestContext;
use crate::error::Result;
use crate::models::{Account, Holding, Id, User};
use crate::storage::EntityStore;

/// Users, their accounts and the holdings in them.
#[derive(Clone)]
pub struct UserService {
    store: EntityStore,
}

impl UserService {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    pub async fn create_user(&self, ctx: &RequestContext) -> Result<User> {
        self.store.create_user(ctx).await
    }

    pub async fn get_user(&self, ctx: &RequestContext, id: &Id) -> Result<User> {
        self.store.get_user(ctx, id).await
    }

    /// `CONFLICT` while the user still owns accounts.
    pub async fn delete_user(&self, ctx: &RequestContext, id: &Id) -> Result<()> {
        self.store.delete_user(ctx, id).await
    }

    pub async fn create_account(&self, ctx: &RequestContext, user_id: &Id) -> Result<Account> {
        self.store.create_account(ctx, user_id).await
    }

    pub async fn get_account(&self, ctx: &RequestContext, id: &Id) -> Result<Account> {
        self.store.get_account(ctx, id).await
    }

    /// `CONFLICT` while the account holds anything.
    pub async fn delete_account(&self, ctx: &RequestContext, id: &Id) -> Result<()> {
        self.store.delete_account(ctx, id).await
    }

    pub async fn list_accounts(&self, ctx: &RequestContext, user_id: &Id) -> Result<Vec<Account>> {
        self.store.list_accounts(ctx, user_id).await
    }

    pub async fn upsert_holding(
        &self,
        ctx: &RequestContext,
        account_id: &Id,
        asset_id: &Id,
        quantity: Decimal,
    ) -> Result<Option<Holding>> {
        self.store
            .upsert_holding(ctx, account_id, asset_id, quantity)
            .await
    }

    pub async fn get_holding(&self, ctx: &RequestContext, id: &Id) -> Result<Holding> {
        self.store.get_holding(ctx, id).await
    }

    pub async fn list_holdings(&self, ctx: &RequestContext, account_id: &Id) -> Result<Vec<Holding>> {
        self.store.list_holdings(ctx, account_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::AssetKind;
    use crate::storage::StoreOptions;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_account_lifecycle() -> anyhow::Result<()> {
        let store = EntityStore::in_memory(StoreOptions::default());
        let users = UserService::new(store.clone());
        let ctx = RequestContext::background();

        let user = users.create_user(&ctx).await?;
        let account = users.create_account(&ctx, &user.id).await?;
        let btc = store.create_asset(&ctx, "BTC", AssetKind::Crypto).await?;
        users.upsert_holding(&ctx, &account.id, &btc.id, dec!(1)).await?;

        let err = users.delete_account(&ctx, &account.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let err = users.delete_user(&ctx, &user.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        users.upsert_holding(&ctx, &account.id, &btc.id, dec!(0)).await?;
        users.delete_account(&ctx, &account.id).await?;
        users.delete_user(&ctx, &user.id).await?;

        let err = users.get_user(&ctx, &user.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_accounts_of_missing_user() {
        let users = UserService::new(EntityStore::in_memory(StoreOptions::default()));
        let err = users
            .list_accounts(&RequestContext::background(), &Id::from("ghost"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

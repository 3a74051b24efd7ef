//! Attaching token types to an owner model.
//!
//! An `OwnerModel` stands for one host record definition (e.g. `user`). Each
//! attached token type gets its own registry, built eagerly at attach time.
//! Token types on the same model must differ both in type tag and in every
//! derived operation name; a clash is a configuration error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::TokenRegistry;
use crate::config::TokenConfig;
use crate::errors::{Result, TokenError};
use crate::hashing::CredentialGenerator;
use crate::store::TokenStore;

/// Operation names derived from a token name, e.g. `ApiAccess` gives
/// `createApiAccess`, `findByApiAccessKey` and the accessor `apiAccess`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationNames {
    pub create: String,
    pub remove: String,
    pub find: String,
    pub find_by: String,
    pub find_by_key: String,
    pub find_by_secret: String,
    pub accessor: String,
}

impl OperationNames {
    pub fn derive(token_name: &str) -> Self {
        let name = token_name.trim();
        let upper = with_first(name, char::to_ascii_uppercase);
        let lower = with_first(name, char::to_ascii_lowercase);
        Self {
            create: format!("create{upper}"),
            remove: format!("remove{upper}"),
            find: format!("find{upper}"),
            find_by: format!("findBy{upper}"),
            find_by_key: format!("findBy{upper}Key"),
            find_by_secret: format!("findBy{upper}Secret"),
            accessor: lower,
        }
    }

    pub fn all(&self) -> [&str; 7] {
        [
            &self.create,
            &self.remove,
            &self.find,
            &self.find_by,
            &self.find_by_key,
            &self.find_by_secret,
            &self.accessor,
        ]
    }
}

fn with_first(name: &str, f: fn(&char) -> char) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => std::iter::once(f(&first)).chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Default)]
struct Attachments {
    /// type tag → registry
    registries: HashMap<String, Arc<TokenRegistry>>,
    /// operation name → type tag that owns it
    operations: HashMap<String, String>,
}

pub struct OwnerModel {
    name: String,
    store: Arc<dyn TokenStore>,
    generator: CredentialGenerator,
    attachments: Mutex<Attachments>,
}

impl OwnerModel {
    /// All registries attached here share `store` and `generator`, and so
    /// share one salt cache.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn TokenStore>,
        generator: CredentialGenerator,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            generator,
            attachments: Mutex::new(Attachments::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a token type and build its registry.
    pub fn attach(&self, config: TokenConfig) -> Result<Arc<TokenRegistry>> {
        config.validate()?;
        let type_tag = config.type_tag();
        let names = OperationNames::derive(&config.token_name);

        let mut attachments = self
            .attachments
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let clashes = attachments.registries.contains_key(&type_tag)
            || names
                .all()
                .iter()
                .any(|op| attachments.operations.contains_key(*op));
        if clashes {
            return Err(TokenError::DuplicateTokenName {
                model: self.name.clone(),
                name: config.token_name.clone(),
            });
        }

        let registry = Arc::new(TokenRegistry::new(
            config,
            self.store.clone(),
            self.generator.clone(),
        )?);

        for op in names.all() {
            attachments
                .operations
                .insert(op.to_string(), type_tag.clone());
        }
        attachments
            .registries
            .insert(type_tag.clone(), registry.clone());

        tracing::info!(
            model = %self.name,
            token_type = %type_tag,
            operations = ?names.all(),
            "token type attached"
        );
        Ok(registry)
    }

    /// Direct registry accessor by token name (case-insensitive).
    pub fn registry(&self, token_name: &str) -> Option<Arc<TokenRegistry>> {
        let type_tag = token_name.trim().to_lowercase();
        self.attachments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .registries
            .get(&type_tag)
            .cloned()
    }

    /// Attached type tags, sorted.
    pub fn token_types(&self) -> Vec<String> {
        let attachments = self
            .attachments
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut tags: Vec<String> = attachments.registries.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Shared salt utility.
    pub async fn salt(&self, cost: u32) -> Result<String> {
        self.generator.salt_for(cost).await
    }

    /// Shared hash utility.
    pub async fn hash(&self, input: &str, cost: u32) -> Result<String> {
        self.generator.hash(input, cost).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::Sha256Backend;
    use crate::store::MemoryStore;

    fn model() -> OwnerModel {
        OwnerModel::new(
            "user",
            Arc::new(MemoryStore::new()),
            CredentialGenerator::new(Arc::new(Sha256Backend::new())),
        )
    }

    #[test]
    fn test_operation_names() {
        let names = OperationNames::derive("apiAccess");
        assert_eq!(names.create, "createApiAccess");
        assert_eq!(names.remove, "removeApiAccess");
        assert_eq!(names.find, "findApiAccess");
        assert_eq!(names.find_by, "findByApiAccess");
        assert_eq!(names.find_by_key, "findByApiAccessKey");
        assert_eq!(names.find_by_secret, "findByApiAccessSecret");
        assert_eq!(names.accessor, "apiAccess");
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let model = model();
        model.attach(TokenConfig::new("ApiAccess")).unwrap();

        let err = model.attach(TokenConfig::new("ApiAccess")).unwrap_err();
        assert!(matches!(err, TokenError::DuplicateTokenName { .. }));
        assert!(err.is_configuration());

        // same type tag, different spelling
        assert!(model.attach(TokenConfig::new("apiaccess")).is_err());
    }

    #[test]
    fn test_derived_operation_clash_is_rejected() {
        let model = model();
        model.attach(TokenConfig::new("Api")).unwrap();
        // findByApiKey is already taken by `Api`'s key lookup
        let err = model.attach(TokenConfig::new("ApiKey")).unwrap_err();
        assert!(matches!(err, TokenError::DuplicateTokenName { name, .. } if name == "ApiKey"));
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let model = model();
        assert!(matches!(
            model.attach(TokenConfig::new("")),
            Err(TokenError::MissingTokenName)
        ));
        assert!(model.token_types().is_empty());
    }

    #[test]
    fn test_registry_accessor() {
        let model = model();
        model.attach(TokenConfig::new("PasswordReset")).unwrap();
        model.attach(TokenConfig::new("ApiAccess")).unwrap();

        let reg = model.registry("passwordReset").unwrap();
        assert_eq!(reg.type_tag(), "passwordreset");
        assert!(model.registry("Unknown").is_none());
        assert_eq!(model.token_types(), vec!["apiaccess", "passwordreset"]);
    }

    #[tokio::test]
    async fn test_registries_inherit_model_cost() {
        let model = OwnerModel::new(
            "user",
            Arc::new(MemoryStore::new()),
            CredentialGenerator::new(Arc::new(Sha256Backend::new())).with_cost(5),
        );
        let inherited = model.attach(TokenConfig::new("ApiAccess")).unwrap();
        let overridden = model
            .attach(TokenConfig::new("PasswordReset").cost_factor(2))
            .unwrap();
        assert_eq!(inherited.generator().cost(), 5);
        assert_eq!(overridden.generator().cost(), 2);

        let rec = inherited.create("owner-1", None).await.unwrap();
        assert!(rec.key.unwrap().starts_with("$s256$05$"));
        let rec = overridden.create("owner-1", None).await.unwrap();
        assert!(rec.secret.unwrap().starts_with("$s256$02$"));
    }

    #[test]
    fn test_out_of_range_cost_is_rejected() {
        let model = model();
        let err = model
            .attach(TokenConfig::new("ApiAccess").cost_factor(0))
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidCostFactor { cost: 0 }));
        assert!(model.registry("ApiAccess").is_none());
    }

    #[tokio::test]
    async fn test_registries_share_salts() {
        let model = model();
        let a = model.attach(TokenConfig::new("A")).unwrap();
        let b = model.attach(TokenConfig::new("B")).unwrap();

        let salt = model.salt(1).await.unwrap();
        assert_eq!(a.generator().salt_for(1).await.unwrap(), salt);
        assert_eq!(b.generator().salt_for(1).await.unwrap(), salt);
        assert_eq!(
            model.hash("x", 1).await.unwrap(),
            a.generator().hash("x", 1).await.unwrap()
        );
    }
}

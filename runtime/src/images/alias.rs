//! Image aliases.

use depot_core::error::{DepotError, Result};
use depot_core::image::{alias_url, AliasInfo, AliasPostRequest};
use std::sync::Arc;

use crate::db::Database;

/// CRUD over image aliases.
#[derive(Clone)]
pub struct AliasService {
    db: Arc<Database>,
}

impl AliasService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create an alias. `description` defaults to the alias name.
    pub fn create(&self, request: &AliasPostRequest) -> Result<AliasInfo> {
        if request.name.is_empty() {
            return Err(DepotError::BadRequest("name is required".into()));
        }
        if request.target.is_empty() {
            return Err(DepotError::BadRequest("target is required".into()));
        }

        let image = self.db.get_image(&request.target, false)?;
        let description = if request.description.is_empty() {
            request.name.clone()
        } else {
            request.description.clone()
        };

        self.db.add_alias(&request.name, image.id, &description)?;
        tracing::info!(alias = %request.name, fingerprint = %image.fingerprint, "Alias created");

        Ok(AliasInfo {
            name: request.name.clone(),
            target: image.fingerprint,
            description,
        })
    }

    pub fn get(&self, name: &str, trusted: bool) -> Result<AliasInfo> {
        self.db.get_alias(name, !trusted)
    }

    pub fn list_urls(&self) -> Result<Vec<String>> {
        Ok(self
            .db
            .list_aliases()?
            .iter()
            .map(|name| alias_url(name))
            .collect())
    }

    /// Records of aliases visible to the caller; aliases of hidden images
    /// are skipped.
    pub fn list_records(&self, trusted: bool) -> Result<Vec<AliasInfo>> {
        let mut records = Vec::new();
        for name in self.db.list_aliases()? {
            match self.db.get_alias(&name, !trusted) {
                Ok(alias) => records.push(alias),
                Err(DepotError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.db.delete_alias(name)?;
        tracing::info!(alias = %name, "Alias deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewImage;
    use std::collections::HashMap;

    fn service_with_images() -> (AliasService, String, String) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let public = "a".repeat(64);
        let private = "b".repeat(64);
        for (fp, is_public) in [(&public, true), (&private, false)] {
            let image = NewImage {
                fingerprint: fp.clone(),
                public: is_public,
                ..Default::default()
            };
            db.insert_image(&image, &HashMap::new()).unwrap();
        }
        (AliasService::new(db), public, private)
    }

    fn request(name: &str, target: &str) -> AliasPostRequest {
        AliasPostRequest {
            name: name.to_string(),
            description: String::new(),
            target: target.to_string(),
        }
    }

    #[test]
    fn test_alias_lifecycle() {
        let (service, public, _) = service_with_images();

        let alias = service.create(&request("alpine/3.12", &public)).unwrap();
        assert_eq!(alias.description, "alpine/3.12");

        let fetched = service.get("alpine/3.12", false).unwrap();
        assert_eq!(fetched.target, public);
        assert_eq!(service.list_urls().unwrap(), vec!["/1.0/images/aliases/alpine/3.12"]);

        service.delete("alpine/3.12").unwrap();
        assert!(matches!(service.get("alpine/3.12", true), Err(DepotError::NotFound(_))));

        service.create(&request("alpine/3.12", &public)).unwrap();
        assert!(matches!(
            service.create(&request("alpine/3.12", &public)),
            Err(DepotError::Conflict(_))
        ));
    }

    #[test]
    fn test_conflict_keeps_prior_alias() {
        let (service, public, private) = service_with_images();
        service.create(&request("base", &public)).unwrap();
        assert!(service.create(&request("base", &private)).is_err());
        assert_eq!(service.get("base", true).unwrap().target, public);
    }

    #[test]
    fn test_create_validates_request() {
        let (service, public, _) = service_with_images();
        assert!(matches!(service.create(&request("", &public)), Err(DepotError::BadRequest(_))));
        assert!(matches!(service.create(&request("x", "")), Err(DepotError::BadRequest(_))));
        assert!(matches!(
            service.create(&request("x", &"c".repeat(64))),
            Err(DepotError::NotFound(_))
        ));
    }

    #[test]
    fn test_private_aliases_hidden_from_untrusted() {
        let (service, public, private) = service_with_images();
        service.create(&request("pub", &public)).unwrap();
        service.create(&request("priv", &private)).unwrap();

        assert!(service.get("priv", false).is_err());
        assert!(service.get("priv", true).is_ok());

        let names: Vec<String> = service
            .list_records(false)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["pub"]);
        assert_eq!(service.list_records(true).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_missing_alias() {
        let (service, _, _) = service_with_images();
        assert!(matches!(service.delete("ghost"), Err(DepotError::NotFound(_))));
    }
}

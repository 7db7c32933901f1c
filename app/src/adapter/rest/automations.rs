use super::GatewayApi;
use crate::core::cbor::Value;
use crate::documents::Automation;
use crate::error::{Error, ValidationError};

impl GatewayApi {
    #[tracing::instrument(skip(self))]
    pub async fn fetch_automations(&self) -> Result<Vec<Automation>, Error> {
        let doc = self.get_cbor(&["api", "automations"]).await?;
        Ok(Automation::list_from_cbor(&doc)?)
    }

    /// Creates the automation or replaces the one with the same id.
    #[tracing::instrument(skip(self, automation), fields(id = %automation.id))]
    pub async fn save_automation(&self, automation: &Automation) -> Result<(), Error> {
        validate_id(&automation.id)?;
        if automation.name.trim().is_empty() {
            return Err(ValidationError::field("name", "must not be empty").into());
        }

        let body = Value::map([
            ("id", Value::from(automation.id.as_str())),
            ("name", Value::from(automation.name.trim())),
            ("enabled", Value::from(automation.enabled)),
            ("automation", Value::from(automation.automation.clone())),
        ]);
        self.post_cbor(&["api", "automations"], &body).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_automation_enabled(&self, id: &str, enabled: bool) -> Result<(), Error> {
        validate_id(id)?;
        self.patch_cbor(&["api", "automations", id], &Value::map([("enabled", Value::from(enabled))]))
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_automation(&self, id: &str) -> Result<(), Error> {
        validate_id(id)?;
        self.delete_cbor(&["api", "automations", id]).await?;
        Ok(())
    }

    /// `None` when the gateway has no settings document.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_settings(&self) -> Result<Option<Value>, Error> {
        let doc = self.get_cbor(&["api", "settings"]).await?;
        Ok(settings_from(doc))
    }

    #[tracing::instrument(skip_all)]
    pub async fn save_settings(&self, settings: &Value) -> Result<(), Error> {
        if !matches!(settings, Value::Map(_)) {
            return Err(ValidationError::field("settings", "must be a map").into());
        }
        self.post_cbor(&["api", "settings"], settings).await?;
        Ok(())
    }
}

fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::field("id", "must not be empty"));
    }
    Ok(())
}

fn settings_from(doc: Value) -> Option<Value> {
    match doc.get("settings") {
        Some(settings @ Value::Map(_)) => Some(settings.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api() -> GatewayApi {
        super::super::tests::api("http://127.0.0.1:1")
    }

    #[test]
    fn settings_must_be_a_map() {
        assert_eq!(settings_from(Value::Null), None);
        assert_eq!(settings_from(Value::map([("settings", Value::from("x"))])), None);
        assert_eq!(
            settings_from(Value::map([("settings", Value::map([("theme", Value::from("dark"))]))])),
            Some(Value::map([("theme", Value::from("dark"))]))
        );
    }

    #[tokio::test]
    async fn automation_needs_id_and_name() {
        let mut automation = Automation {
            id: " ".to_owned(),
            name: "Night".to_owned(),
            enabled: true,
            automation: json!({"triggers": []}),
        };

        let err = api().save_automation(&automation).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::Field { field: "id", .. })));

        automation.id = "a1".to_owned();
        automation.name = String::new();
        let err = api().save_automation(&automation).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::Field { field: "name", .. })));
    }

    #[tokio::test]
    async fn toggling_and_deleting_need_an_id() {
        assert!(matches!(
            api().set_automation_enabled("", true).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(api().delete_automation("").await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn settings_are_posted_as_map_only() {
        let err = api().save_settings(&Value::from(1u8)).await.unwrap_err();

        assert!(matches!(err, Error::Validation(ValidationError::Field { field: "settings", .. })));
    }
}

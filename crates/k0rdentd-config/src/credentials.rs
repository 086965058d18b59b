//! Cloud credential definitions declared in the configuration file

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Credentials for all supported cloud providers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aws: Vec<AwsCredential>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub azure: Vec<AzureCredential>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub openstack: Vec<OpenStackCredential>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AwsCredential {
    pub name: String,
    pub region: String,
    #[serde(rename = "accessKeyID")]
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Only needed for MFA or SSO sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

/// Azure service principal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureCredential {
    pub name: String,
    #[serde(rename = "subscriptionID")]
    pub subscription_id: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
}

/// OpenStack credentials, either an application credential or username/password
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenStackCredential {
    pub name: String,
    #[serde(rename = "authURL")]
    pub auth_url: String,
    pub region: String,
    #[serde(rename = "applicationCredentialID", skip_serializing_if = "Option::is_none")]
    pub application_credential_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_credential_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
}

impl OpenStackCredential {
    /// Returns the application credential pair when both halves are set
    pub fn application_credential(&self) -> Option<(&str, &str)> {
        match (
            self.application_credential_id.as_deref(),
            self.application_credential_secret.as_deref(),
        ) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Some((id, secret)),
            _ => None,
        }
    }
}

/// A single provider-typed credential
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialDefinition {
    Aws(AwsCredential),
    Azure(AzureCredential),
    OpenStack(OpenStackCredential),
}

/// Cloud provider a credential belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Provider {
    Aws,
    Azure,
    OpenStack,
}

impl Provider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Aws => "AWS",
            Provider::Azure => "Azure",
            Provider::OpenStack => "OpenStack",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl CredentialDefinition {
    pub fn name(&self) -> &str {
        match self {
            CredentialDefinition::Aws(c) => &c.name,
            CredentialDefinition::Azure(c) => &c.name,
            CredentialDefinition::OpenStack(c) => &c.name,
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            CredentialDefinition::Aws(_) => Provider::Aws,
            CredentialDefinition::Azure(_) => Provider::Azure,
            CredentialDefinition::OpenStack(_) => Provider::OpenStack,
        }
    }

    /// Human readable description stored on the Credential object
    pub fn description(&self) -> String {
        match self {
            CredentialDefinition::Aws(c) => {
                format!("AWS credentials for {} in region {}", c.name, c.region)
            }
            CredentialDefinition::Azure(c) => format!(
                "Azure credentials for {} (subscription: {})",
                c.name, c.subscription_id
            ),
            CredentialDefinition::OpenStack(c) => {
                format!("OpenStack credentials for {} (region: {})", c.name, c.region)
            }
        }
    }

    pub fn secret_name(&self) -> String {
        format!("{}-secret", self.name())
    }

    pub fn identity_name(&self) -> String {
        format!("{}-identity", self.name())
    }

    /// Missing required fields, as `field` names
    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let mut require = |value: &str, field: &'static str| {
            if value.trim().is_empty() {
                missing.push(field);
            }
        };
        match self {
            CredentialDefinition::Aws(c) => {
                require(&c.name, "name");
                require(&c.region, "region");
                require(&c.access_key_id, "accessKeyID");
                require(&c.secret_access_key, "secretAccessKey");
            }
            CredentialDefinition::Azure(c) => {
                require(&c.name, "name");
                require(&c.subscription_id, "subscriptionID");
                require(&c.client_id, "clientID");
                require(&c.client_secret, "clientSecret");
                require(&c.tenant_id, "tenantID");
            }
            CredentialDefinition::OpenStack(c) => {
                require(&c.name, "name");
                require(&c.auth_url, "authURL");
                require(&c.region, "region");
                if c.application_credential().is_none() {
                    require(c.username.as_deref().unwrap_or_default(), "username");
                    require(c.password.as_deref().unwrap_or_default(), "password");
                }
            }
        }
        missing
    }
}

impl CredentialsConfig {
    pub fn is_empty(&self) -> bool {
        self.aws.is_empty() && self.azure.is_empty() && self.openstack.is_empty()
    }

    /// All credentials in provisioning order: AWS, Azure, then OpenStack
    pub fn definitions(&self) -> Vec<CredentialDefinition> {
        self.aws
            .iter()
            .cloned()
            .map(CredentialDefinition::Aws)
            .chain(self.azure.iter().cloned().map(CredentialDefinition::Azure))
            .chain(
                self.openstack
                    .iter()
                    .cloned()
                    .map(CredentialDefinition::OpenStack),
            )
            .collect()
    }

    /// Distinct providers that have at least one credential
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> =
            self.definitions().iter().map(|d| d.provider()).collect();
        providers.sort();
        providers.dedup();
        providers
    }

    pub(crate) fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen: HashSet<(Provider, String)> = HashSet::new();

        for definition in self.definitions() {
            let provider = definition.provider();
            let name = definition.name().to_string();

            for field in definition.missing_fields() {
                errors.push(format!(
                    "{} credential '{}': {} is required",
                    provider, name, field
                ));
            }

            if !name.is_empty() && !seen.insert((provider, name.clone())) {
                errors.push(format!("{} credential '{}' is declared twice", provider, name));
            }
        }

        errors
    }
}

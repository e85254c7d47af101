use std::collections::HashMap;

use bson::Document;
use zeroize::Zeroizing;

/// AWS signing credentials for KMS requests.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Azure Key Vault bearer token. The embedder performs the OAuth exchange;
/// the engine only needs the resulting token.
#[derive(Debug, Clone)]
pub struct AzureCredentials {
    pub access_token: String,
}

/// GCP Cloud KMS bearer token, same contract as Azure.
#[derive(Debug, Clone)]
pub struct GcpCredentials {
    pub access_token: String,
}

/// Per-provider KMS credentials. A provider without credentials configured
/// cannot appear in any key document handled by this handle.
#[derive(Clone, Default)]
pub struct KmsCredentials {
    pub aws: Option<AwsCredentials>,
    pub azure: Option<AzureCredentials>,
    pub gcp: Option<GcpCredentials>,
    pub local_master_key: Option<Zeroizing<Vec<u8>>>,
}

impl std::fmt::Debug for KmsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsCredentials")
            .field("aws", &self.aws.is_some())
            .field("azure", &self.azure.is_some())
            .field("gcp", &self.gcp.is_some())
            .field("local_master_key", &self.local_master_key.is_some())
            .finish()
    }
}

impl KmsCredentials {
    pub fn any_configured(&self) -> bool {
        self.aws.is_some()
            || self.azure.is_some()
            || self.gcp.is_some()
            || self.local_master_key.is_some()
    }
}

/// Read-only handle configuration, shared by every context.
#[derive(Debug, Clone, Default)]
pub struct CryptOptions {
    pub kms: KmsCredentials,
    /// Namespace ("db.coll") to JSON schema. A hit here lets auto-encrypt
    /// skip the collection-info round trip.
    pub schema_map: HashMap<String, Document>,
}

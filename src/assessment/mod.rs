//! Bot/abuse risk assessment of client tokens.

pub mod assessor;
pub mod credentials;
pub mod model;
pub mod provider;

pub use assessor::ActionAssessor;
pub use credentials::{CredentialProvider, ProviderCredential, credentials_from_config};
pub use model::{AssessmentRequest, AssessmentResult, ProviderAssessment};
pub use provider::{RecaptchaEnterpriseClient, RiskAssessmentProvider};

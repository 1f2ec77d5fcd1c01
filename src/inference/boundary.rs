//! Typed request and response records of the prediction boundary.
//!
//! The request is the flat 8-field record a gateway forwards; every
//! categorical field is a closed enumeration matching the dataset spelling.

use crate::error::PipelineError;
use crate::representation::RawValue;
use crate::utils::round_to;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Probability at or above which the churn label is returned.
pub const CHURN_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractType {
    #[serde(rename = "Month-to-month")]
    MonthToMonth,
    #[serde(rename = "One year")]
    OneYear,
    #[serde(rename = "Two year")]
    TwoYear,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MonthToMonth => "Month-to-month",
            Self::OneYear => "One year",
            Self::TwoYear => "Two year",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InternetService {
    #[serde(rename = "DSL")]
    Dsl,
    #[serde(rename = "Fiber optic")]
    FiberOptic,
    No,
}

impl InternetService {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dsl => "DSL",
            Self::FiberOptic => "Fiber optic",
            Self::No => "No",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YesNo {
    Yes,
    No,
}

impl YesNo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "Yes",
            Self::No => "No",
        }
    }
}

/// Add-on services, which customers without internet cannot have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InternetAddOn {
    Yes,
    No,
    #[serde(rename = "No internet service")]
    NoInternetService,
}

impl InternetAddOn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "Yes",
            Self::No => "No",
            Self::NoInternetService => "No internet service",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "Electronic check")]
    ElectronicCheck,
    #[serde(rename = "Mailed check")]
    MailedCheck,
    #[serde(rename = "Bank transfer (automatic)")]
    BankTransfer,
    #[serde(rename = "Credit card (automatic)")]
    CreditCard,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElectronicCheck => "Electronic check",
            Self::MailedCheck => "Mailed check",
            Self::BankTransfer => "Bank transfer (automatic)",
            Self::CreditCard => "Credit card (automatic)",
        }
    }
}

/// Flat prediction request. Unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredictRequest {
    /// Months as a customer, never negative
    pub tenure: i64,
    pub contract: ContractType,
    pub internet_service: InternetService,
    pub online_security: InternetAddOn,
    pub tech_support: InternetAddOn,
    pub monthly_charges: f64,
    pub paperless_billing: YesNo,
    pub payment_method: PaymentMethod,
}

impl PredictRequest {
    /// Parse and validate a JSON body.
    pub fn from_json(body: &str) -> Result<Self, BoundaryError> {
        let request: Self = serde_json::from_str(body)
            .map_err(|e| BoundaryError::invalid_input(format!("malformed request: {e}")))?;
        request.validate()?;
        Ok(request)
    }

    /// Range checks serde cannot express.
    pub fn validate(&self) -> Result<(), BoundaryError> {
        if self.tenure < 0 {
            return Err(BoundaryError::invalid_input(format!(
                "tenure must be >= 0, got {}",
                self.tenure
            )));
        }
        if !self.monthly_charges.is_finite() || self.monthly_charges < 0.0 {
            return Err(BoundaryError::invalid_input(format!(
                "monthly_charges must be a finite number >= 0, got {}",
                self.monthly_charges
            )));
        }
        Ok(())
    }

    /// The request as a raw record keyed by field name.
    pub fn to_record(&self) -> BTreeMap<String, RawValue> {
        let fields = [
            ("tenure", RawValue::from(self.tenure)),
            ("contract", self.contract.as_str().into()),
            ("internet_service", self.internet_service.as_str().into()),
            ("online_security", self.online_security.as_str().into()),
            ("tech_support", self.tech_support.as_str().into()),
            ("monthly_charges", RawValue::from(self.monthly_charges)),
            ("paperless_billing", self.paperless_billing.as_str().into()),
            ("payment_method", self.payment_method.as_str().into()),
        ];
        fields
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChurnLabel {
    #[serde(rename = "Vai cancelar")]
    WillChurn,
    #[serde(rename = "Vai continuar")]
    WillStay,
}

impl ChurnLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WillChurn => "Vai cancelar",
            Self::WillStay => "Vai continuar",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub label: ChurnLabel,
    /// Churn probability, two decimals
    pub probability: f64,
}

impl PredictResponse {
    /// Label and round a positive-class probability.
    pub fn from_probability(probability: f64) -> Result<Self, BoundaryError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(BoundaryError::internal(format!(
                "estimator returned probability {probability} outside [0, 1]"
            )));
        }
        let label = if probability >= CHURN_THRESHOLD {
            ChurnLabel::WillChurn
        } else {
            ChurnLabel::WillStay
        };
        Ok(Self {
            label,
            probability: round_to(probability, 2),
        })
    }
}

/// Failure classes a gateway maps to distinct responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryErrorKind {
    InvalidInput,
    ServiceUnavailable,
    Internal,
}

impl BoundaryErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Internal => "internal",
        }
    }

    /// HTTP status a gateway answers with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::ServiceUnavailable => 503,
            Self::Internal => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryError {
    pub kind: BoundaryErrorKind,
    pub message: String,
}

impl BoundaryError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            kind: BoundaryErrorKind::InvalidInput,
            message: message.into(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: BoundaryErrorKind::ServiceUnavailable,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: BoundaryErrorKind::Internal,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for BoundaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for BoundaryError {}

/// Pipeline failures behind the boundary are internal, except a request
/// value the fitted encoder refuses.
impl From<PipelineError> for BoundaryError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UnknownCategory { .. } => Self::invalid_input(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BODY: &str = r#"{
        "tenure": 12,
        "contract": "Month-to-month",
        "internet_service": "Fiber optic",
        "online_security": "No",
        "tech_support": "No internet service",
        "monthly_charges": 89.5,
        "paperless_billing": "Yes",
        "payment_method": "Electronic check"
    }"#;

    #[test]
    fn test_request_parses_dataset_spellings() -> anyhow::Result<()> {
        let request = PredictRequest::from_json(BODY)?;
        assert_eq!(request.contract, ContractType::MonthToMonth);
        assert_eq!(request.tech_support, InternetAddOn::NoInternetService);

        let record = request.to_record();
        assert_eq!(record.len(), 8);
        assert_eq!(record.get("tenure"), Some(&RawValue::Number(12.0)));
        assert_eq!(
            record.get("payment_method"),
            Some(&RawValue::Text("Electronic check".to_owned()))
        );
        Ok(())
    }

    #[test]
    fn test_invalid_requests_are_invalid_input() {
        let unknown_field = BODY.replace("\"tenure\": 12,", "\"tenure\": 12, \"gender\": \"F\",");
        let bad_enum = BODY.replace("Fiber optic", "Satellite");
        let negative = BODY.replace("\"tenure\": 12", "\"tenure\": -1");
        let missing = BODY.replace("\"monthly_charges\": 89.5,", "");

        for body in [unknown_field, bad_enum, negative, missing] {
            let err = PredictRequest::from_json(&body).unwrap_err();
            assert_eq!(err.kind, BoundaryErrorKind::InvalidInput, "{body}");
            assert_eq!(err.kind.http_status(), 400);
        }
    }

    #[test]
    fn test_response_label_threshold_and_rounding() -> anyhow::Result<()> {
        let churn = PredictResponse::from_probability(0.5)?;
        assert_eq!(churn.label, ChurnLabel::WillChurn);

        let stay = PredictResponse::from_probability(0.12345)?;
        assert_eq!(stay.label, ChurnLabel::WillStay);
        assert_eq!(stay.probability, 0.12);

        let json = serde_json::to_string(&PredictResponse::from_probability(0.814)?)?;
        assert_eq!(json, r#"{"label":"Vai cancelar","probability":0.81}"#);

        let err = PredictResponse::from_probability(f64::NAN).unwrap_err();
        assert_eq!(err.kind, BoundaryErrorKind::Internal);
        Ok(())
    }

    #[test]
    fn test_pipeline_errors_map_to_boundary_classes() {
        let unknown = BoundaryError::from(PipelineError::UnknownCategory {
            column: "contract".to_owned(),
            value: "Lifetime".to_owned(),
        });
        assert_eq!(unknown.kind, BoundaryErrorKind::InvalidInput);
        let parity = BoundaryError::from(PipelineError::RepresentationInconsistency("width".to_owned()));
        assert_eq!(parity.kind, BoundaryErrorKind::Internal);
    }
}

//! Model-ready representation of a partition.
//!
//! The building blocks follow a fit/transform split: unfitted configuration
//! types ([`ColumnTransformer`], [`OneHotEncoder`], [`NumericEncoding`]) learn
//! state from the train features only and hand back frozen `Fitted*` values
//! that can transform any frame or single record.

pub mod encoder;
pub mod scaler;
pub mod target;
pub mod transformer;

pub use encoder::{FittedOneHot, HandleUnknown, OneHotEncoder};
pub use scaler::{FittedScaler, NumericEncoding};
pub use target::{TargetDtype, TargetEncoding};
pub use transformer::{CategoricalEncoding, ColumnRole, ColumnTransformer, FittedTransformer, RawValue};

use ndarray::Array2;
use polars::prelude::Series;

/// Terminal output of the representation stage. Frozen once built.
#[derive(Debug, Clone)]
pub struct Representation {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Series,
    pub y_test: Series,
    pub feature_names: Vec<String>,
    pub transformer: FittedTransformer,
    pub target_mapping: TargetEncoding,
}

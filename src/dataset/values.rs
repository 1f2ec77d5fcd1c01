//! Column access helpers over Polars frames.
//!
//! Stages never mutate a frame in place. They compute replacement series or
//! expressions and rebuild a new frame, so untouched columns are carried
//! over as-is.

use crate::error::{PipelineError, Result};
use polars::prelude::*;
use std::collections::HashMap;

/// Label standing in for a missing value wherever values are grouped.
pub const NULL_LABEL: &str = "<null>";

/// Borrow a column as a materialized series.
pub fn series<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series> {
    Ok(df.column(name)?.as_materialized_series())
}

/// True for numeric dtypes that are treated as measurements (booleans are not).
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    dtype.is_primitive_numeric() && !dtype.is_bool()
}

/// True for string-like dtypes.
pub fn is_text_dtype(dtype: &DataType) -> bool {
    dtype.is_string()
}

/// Column values rendered as strings, nulls kept.
pub fn text_values(series: &Series) -> Result<Vec<Option<String>>> {
    let cast = series.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_owned))
        .collect())
}

/// Column values as `f64`, nulls kept. Unparseable strings become null.
pub fn numeric_values(series: &Series) -> Result<Vec<Option<f64>>> {
    let cast = series.cast(&DataType::Float64)?;
    Ok(cast.f64()?.into_iter().collect())
}

/// The series cast to text with nulls rendered as [`NULL_LABEL`].
pub fn label_series(source: &Series) -> Result<Series> {
    let text = source.cast(&DataType::String)?;
    let text = text.str()?;
    Ok(text.set(&text.is_null(), Some(NULL_LABEL))?.into_series())
}

/// Values as group labels, nulls rendered as [`NULL_LABEL`].
pub fn label_values(source: &Series) -> Result<Vec<String>> {
    Ok(label_series(source)?
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or(NULL_LABEL).to_owned())
        .collect())
}

/// Distinct non-null values, rendered as text, in first-seen order.
pub fn distinct_in_order(source: &Series) -> Result<Vec<String>> {
    let unique = source.drop_nulls().cast(&DataType::String)?.unique_stable()?;
    Ok(unique
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_owned)
        .collect())
}

/// Non-null value counts, rendered as text, sorted by count desc then value.
pub fn value_counts(source: &Series) -> Result<Vec<(String, usize)>> {
    let values = source
        .drop_nulls()
        .cast(&DataType::String)?
        .with_name("value".into());
    let counts = values
        .value_counts(false, false, "counts".into(), false)?
        .sort(
            ["counts", "value"],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )?;
    let labels = series(&counts, "value")?.str()?;
    let tallies = series(&counts, "counts")?.cast(&DataType::UInt64)?;
    Ok(labels
        .into_iter()
        .zip(tallies.u64()?)
        .filter_map(|(value, count)| Some((value?.to_owned(), usize::try_from(count?).ok()?)))
        .collect())
}

/// Rebuild `df` with some columns swapped for new series of the same name.
///
/// Column order and every column not named in `replacements` are preserved.
pub fn replace_columns(df: &DataFrame, replacements: Vec<Series>) -> Result<DataFrame> {
    let mut by_name: HashMap<String, Series> = replacements
        .into_iter()
        .map(|s| (s.name().to_string(), s))
        .collect();

    let columns: Vec<Column> = df
        .get_columns()
        .iter()
        .map(|c| match by_name.remove(c.name().as_str()) {
            Some(s) => Column::from(s),
            None => c.clone(),
        })
        .collect();

    if let Some(name) = by_name.keys().next() {
        return Err(PipelineError::StructuralInvariant(format!(
            "replacement column '{name}' does not exist in the dataset"
        )));
    }

    Ok(DataFrame::new(columns)?)
}

/// Project `df` onto `names`, in that order.
pub fn select_columns(df: &DataFrame, names: &[String]) -> Result<DataFrame> {
    let columns = names
        .iter()
        .map(|n| df.column(n).cloned())
        .collect::<PolarsResult<Vec<Column>>>()?;
    Ok(DataFrame::new(columns)?)
}

/// Gather rows by position.
pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let idx = rows
        .iter()
        .map(|&i| {
            IdxSize::try_from(i).map_err(|e| {
                PipelineError::DataProcessing(format!("row index {i} exceeds index width: {e}"))
            })
        })
        .collect::<Result<Vec<IdxSize>>>()?;
    let idx = IdxCa::from_vec("idx".into(), idx);
    Ok(df.take(&idx)?)
}

/// Column names as owned strings.
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect()
}

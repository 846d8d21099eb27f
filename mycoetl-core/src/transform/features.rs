//! Feature engineering: categorical encoding, interactions, scaling and
//! mutual-information feature selection.
//!
//! The target column is split off before any step runs and appended back as
//! the last column, unchanged.

use super::numeric::{mean, numeric_cells, std_dev};
use super::{Transformer, validate_output};
use crate::error::{EtlError, Result};
use crate::table::{RecordBatch, as_f64, cell_to_string, float_value};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Maximum number of pairwise interaction columns created.
pub const MAX_INTERACTIONS: usize = 10;

/// Number of equal-width bins used to discretize features for mutual information.
const MI_BINS: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoricalEncoding {
    /// One boolean indicator column per category.
    #[default]
    OneHot,
    /// Index of the value among the column's sorted categories.
    Label,
    /// Category codes, with -1 for missing values. Does not use the target.
    Target,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_target_column")]
    pub target_column: String,
    #[serde(default)]
    pub categorical_encoding: CategoricalEncoding,
    #[serde(default = "default_true")]
    pub feature_scaling: bool,
    #[serde(default = "default_true")]
    pub feature_selection: bool,
    #[serde(default = "default_n_features")]
    pub n_features: usize,
    #[serde(default)]
    pub create_interactions: bool,
}

fn default_target_column() -> String {
    "class".to_string()
}

fn default_true() -> bool {
    true
}

fn default_n_features() -> usize {
    20
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            target_column: default_target_column(),
            categorical_encoding: CategoricalEncoding::default(),
            feature_scaling: true,
            feature_selection: true,
            n_features: default_n_features(),
            create_interactions: false,
        }
    }
}

/// Sorted category list for one column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelEncoder {
    pub classes: Vec<String>,
}

impl LabelEncoder {
    fn fit<'a>(values: impl Iterator<Item = &'a Value>) -> Self {
        let classes: BTreeSet<String> = values
            .filter(|v| !v.is_null())
            .map(cell_to_string)
            .collect();
        Self {
            classes: classes.into_iter().collect(),
        }
    }

    pub fn encode(&self, value: &Value) -> Option<usize> {
        if value.is_null() {
            return None;
        }
        self.classes.binary_search(&cell_to_string(value)).ok()
    }
}

/// Per-column mean and scale fitted on the last batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub columns: Vec<String>,
    pub means: Vec<f64>,
    /// Population standard deviation; 1.0 where the column is constant.
    pub scales: Vec<f64>,
}

/// Mutual-information scores for every candidate and the columns kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSelector {
    pub k: usize,
    pub scores: Vec<(String, f64)>,
    pub selected: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub original_shape: (usize, usize),
    pub original_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onehot_columns: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_encoded_columns: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_encoded_columns: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactions_created: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaled_columns: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_features: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feature_scores: BTreeMap<String, f64>,
    pub final_shape: (usize, usize),
    pub feature_count: usize,
    pub feature_names: Vec<String>,
}

pub struct FeatureEngineer {
    config: FeatureConfig,
    stats: FeatureStats,
    label_encoders: BTreeMap<String, LabelEncoder>,
    scaler: Option<StandardScaler>,
    selector: Option<FeatureSelector>,
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

impl FeatureEngineer {
    pub const NAME: &'static str = "feature_engineer";

    pub fn new(config: FeatureConfig) -> Self {
        Self {
            config,
            stats: FeatureStats::default(),
            label_encoders: BTreeMap::new(),
            scaler: None,
            selector: None,
        }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn feature_stats(&self) -> &FeatureStats {
        &self.stats
    }

    pub fn label_encoders(&self) -> &BTreeMap<String, LabelEncoder> {
        &self.label_encoders
    }

    pub fn scaler(&self) -> Option<&StandardScaler> {
        self.scaler.as_ref()
    }

    pub fn selector(&self) -> Option<&FeatureSelector> {
        self.selector.as_ref()
    }

    /// Mutual-information score of each selected feature. Empty until selection has run.
    pub fn get_feature_importance(&self) -> BTreeMap<String, f64> {
        if self.selector.is_none() {
            return BTreeMap::new();
        }
        self.stats.feature_scores.clone()
    }

    /// Feature column names produced by the last run, target excluded.
    pub fn get_engineered_features(&self) -> &[String] {
        &self.stats.feature_names
    }

    fn encode_categorical(&mut self, features: RecordBatch) -> Result<RecordBatch> {
        let categorical = features.text_columns();
        if categorical.is_empty() {
            tracing::info!("No categorical columns found");
            return Ok(features);
        }
        tracing::info!(
            columns = categorical.len(),
            encoding = ?self.config.categorical_encoding,
            "Encoding categorical columns"
        );

        let encoders: Vec<(usize, LabelEncoder)> = categorical
            .iter()
            .map(|&i| (i, LabelEncoder::fit(features.column(i))))
            .collect();

        match self.config.categorical_encoding {
            CategoricalEncoding::OneHot => {
                let keep: Vec<usize> = (0..features.column_count())
                    .filter(|i| !categorical.contains(i))
                    .collect();
                let mut encoded = features.select_columns(&keep);
                // Output column -> the input column it came from.
                let mut origin: HashMap<String, String> = encoded
                    .columns
                    .iter()
                    .map(|c| (c.clone(), c.clone()))
                    .collect();
                for (col, encoder) in &encoders {
                    let source = &features.columns[*col];
                    for (code, category) in encoder.classes.iter().enumerate() {
                        let name = format!("{source}_{category}");
                        if let Some(other) = origin.get(&name) {
                            return Err(EtlError::transform(format!(
                                "one-hot column '{name}' from '{source}' collides with a column \
                                 from '{other}'"
                            )));
                        }
                        let indicator = features
                            .column(*col)
                            .map(|v| Value::Bool(encoder.encode(v) == Some(code)))
                            .collect();
                        encoded.push_column(name.clone(), indicator)?;
                        origin.insert(name, source.clone());
                    }
                }
                self.stats.onehot_columns =
                    Some(encoded.column_count().saturating_sub(features.column_count()));
                Ok(encoded)
            }
            CategoricalEncoding::Label | CategoricalEncoding::Target => {
                let target_mode = self.config.categorical_encoding == CategoricalEncoding::Target;
                if target_mode {
                    tracing::warn!(
                        "Target encoding assigns category codes only; the target is not used"
                    );
                }
                let mut encoded = features;
                for (col, encoder) in &encoders {
                    for row in &mut encoded.rows {
                        row[*col] = match (encoder.encode(&row[*col]), target_mode) {
                            (Some(code), _) => Value::from(code as i64),
                            (None, true) => Value::from(-1),
                            (None, false) => Value::Null,
                        };
                    }
                }
                if target_mode {
                    self.stats.target_encoded_columns = Some(encoders.len());
                } else {
                    self.stats.label_encoded_columns = Some(encoders.len());
                    self.label_encoders = encoders
                        .into_iter()
                        .map(|(i, e)| (encoded.columns[i].clone(), e))
                        .collect();
                }
                Ok(encoded)
            }
        }
    }

    fn create_interactions(&mut self, mut features: RecordBatch) -> Result<RecordBatch> {
        let numeric = features.numeric_columns();
        if numeric.len() < 2 {
            tracing::warn!("Not enough numeric columns for interactions");
            return Ok(features);
        }

        let pairs: Vec<(usize, usize)> = numeric
            .iter()
            .enumerate()
            .flat_map(|(pos, &a)| numeric[pos + 1..].iter().map(move |&b| (a, b)))
            .take(MAX_INTERACTIONS)
            .collect();

        for &(a, b) in &pairs {
            let values: Vec<Value> = features
                .rows
                .iter()
                .map(|row| multiply(&row[a], &row[b]))
                .collect();
            let name = format!("{}_x_{}", features.columns[a], features.columns[b]);
            features.push_column(name, values)?;
        }
        self.stats.interactions_created = Some(pairs.len());
        tracing::info!(created = pairs.len(), "Created feature interactions");
        Ok(features)
    }

    fn scale_features(&mut self, mut features: RecordBatch) -> RecordBatch {
        let numeric = features.numeric_columns();
        if numeric.is_empty() {
            tracing::info!("No numeric columns to scale");
            return features;
        }
        tracing::info!(columns = numeric.len(), "Scaling numeric columns");

        let mut scaler = StandardScaler::default();
        for &col in &numeric {
            let values: Vec<f64> = numeric_cells(&features, col)
                .into_iter()
                .map(|(_, v)| v)
                .collect();
            let m = mean(&values).unwrap_or(0.0);
            let s = std_dev(&values, 0).filter(|s| *s > 0.0).unwrap_or(1.0);
            for row in &mut features.rows {
                if let Some(v) = as_f64(&row[col]) {
                    row[col] = float_value((v - m) / s);
                }
            }
            scaler.columns.push(features.columns[col].clone());
            scaler.means.push(m);
            scaler.scales.push(s);
        }
        self.stats.scaled_columns = Some(numeric.len());
        self.scaler = Some(scaler);
        features
    }

    fn select_features(&mut self, features: RecordBatch, target: &[Value]) -> RecordBatch {
        let numeric = features.numeric_columns();
        if numeric.is_empty() {
            tracing::info!("No numeric columns for feature selection");
            return features;
        }
        let k = self.config.n_features.min(numeric.len());
        tracing::info!(selected = k, candidates = numeric.len(), "Selecting features");

        let scores: Vec<(usize, f64)> = numeric
            .iter()
            .map(|&col| {
                let column: Vec<&Value> = features.column(col).collect();
                (col, mutual_information(&column, target))
            })
            .collect();

        let mut ranked = scores.clone();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let chosen: BTreeSet<usize> = ranked.iter().take(k).map(|(c, _)| *c).collect();

        // Non-numeric feature columns are not scored and always kept.
        let keep: Vec<usize> = (0..features.column_count())
            .filter(|i| !numeric.contains(i) || chosen.contains(i))
            .collect();

        self.stats.selected_features = Some(chosen.len());
        self.stats.feature_scores = scores
            .iter()
            .filter(|(c, _)| chosen.contains(c))
            .map(|(c, s)| (features.columns[*c].clone(), *s))
            .collect();
        self.selector = Some(FeatureSelector {
            k,
            scores: scores
                .iter()
                .map(|(c, s)| (features.columns[*c].clone(), *s))
                .collect(),
            selected: chosen.iter().map(|c| features.columns[*c].clone()).collect(),
        });
        tracing::info!(selected = chosen.len(), "Selected features");
        features.select_columns(&keep)
    }
}

fn multiply(a: &Value, b: &Value) -> Value {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(p) = x.checked_mul(y) {
            return Value::from(p);
        }
    }
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => float_value(x * y),
        _ => Value::Null,
    }
}

/// Mutual information (nats) between a numeric feature, discretized into
/// equal-width bins, and a discrete target. Rows missing either side are skipped.
pub(crate) fn mutual_information(feature: &[&Value], target: &[Value]) -> f64 {
    let pairs: Vec<(f64, String)> = feature
        .iter()
        .zip(target)
        .filter_map(|(f, t)| {
            let x = as_f64(f)?;
            (!t.is_null()).then(|| (x, RecordBatch::row_key(std::slice::from_ref(t))))
        })
        .collect();
    if pairs.is_empty() {
        return 0.0;
    }

    let (min, max) = pairs
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (x, _)| (lo.min(*x), hi.max(*x)));
    let width = (max - min) / MI_BINS as f64;
    let bin = |x: f64| -> usize {
        if width <= 0.0 {
            0
        } else {
            (((x - min) / width) as usize).min(MI_BINS - 1)
        }
    };

    let n = pairs.len() as f64;
    let mut joint: HashMap<(usize, &str), usize> = HashMap::new();
    let mut px: HashMap<usize, usize> = HashMap::new();
    let mut py: HashMap<&str, usize> = HashMap::new();
    for (x, y) in &pairs {
        let b = bin(*x);
        *joint.entry((b, y.as_str())).or_default() += 1;
        *px.entry(b).or_default() += 1;
        *py.entry(y.as_str()).or_default() += 1;
    }

    joint
        .iter()
        .map(|(&(b, y), &count)| {
            let pxy = count as f64 / n;
            let p_x = px[&b] as f64 / n;
            let p_y = py[y] as f64 / n;
            pxy * (pxy / (p_x * p_y)).ln()
        })
        .sum::<f64>()
        .max(0.0)
}

impl Transformer for FeatureEngineer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transform(&mut self, batch: &RecordBatch) -> Result<RecordBatch> {
        tracing::info!(records = batch.row_count(), "Starting feature engineering");
        self.stats = FeatureStats {
            original_shape: (batch.row_count(), batch.column_count()),
            original_columns: batch.columns.clone(),
            ..Default::default()
        };
        self.label_encoders.clear();
        self.scaler = None;
        self.selector = None;

        let target_name = self.config.target_column.clone();
        let (mut features, target) = match batch.column_index(&target_name) {
            Some(idx) => (
                batch.drop_columns(&[target_name.as_str()]),
                Some(batch.column(idx).cloned().collect::<Vec<Value>>()),
            ),
            None => {
                tracing::warn!(column = %target_name, "Target column not found");
                (batch.clone(), None)
            }
        };

        features = self.encode_categorical(features)?;
        if self.config.create_interactions {
            features = self.create_interactions(features)?;
        }
        if self.config.feature_scaling {
            features = self.scale_features(features);
        }
        if self.config.feature_selection {
            if let Some(target) = &target {
                features = self.select_features(features, target);
            }
        }

        self.stats.feature_count = features.column_count();
        self.stats.feature_names = features.columns.clone();

        let mut engineered = features;
        if let Some(target) = target {
            engineered.push_column(target_name, target).map_err(|e| {
                EtlError::transform(format!("cannot reattach target column: {e}"))
            })?;
        }
        self.stats.final_shape = (engineered.row_count(), engineered.column_count());
        tracing::info!(features = self.stats.feature_count, "Feature engineering completed");
        Ok(engineered)
    }

    fn validate(&self, batch: &RecordBatch) -> bool {
        let non_finite = batch
            .numeric_columns()
            .into_iter()
            .flat_map(|c| batch.column(c))
            .filter_map(as_f64)
            .any(|v| !v.is_finite());
        if non_finite {
            tracing::warn!(transformer = Self::NAME, "Found infinite values in engineered data");
        }
        validate_output(Self::NAME, batch)
    }

    fn stats(&self) -> Value {
        serde_json::to_value(&self.stats).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn mushrooms() -> RecordBatch {
        RecordBatch::new(
            vec!["class".into(), "odor".into(), "cap-color".into()],
            vec![
                vec![json!("e"), json!("n"), json!("w")],
                vec![json!("p"), json!("f"), json!("w")],
                vec![json!("e"), json!("a"), json!("y")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_onehot_sorted_categories_target_last() {
        let mut engineer = FeatureEngineer::default();
        let out = engineer.transform(&mushrooms()).unwrap();
        assert_eq!(
            out.columns,
            vec!["odor_a", "odor_f", "odor_n", "cap-color_w", "cap-color_y", "class"]
        );
        assert_eq!(
            out.rows[0],
            vec![
                json!(false),
                json!(false),
                json!(true),
                json!(true),
                json!(false),
                json!("e")
            ]
        );
        assert_eq!(engineer.feature_stats().onehot_columns, Some(3));
        assert_eq!(engineer.get_engineered_features().len(), 5);
        assert!(engineer.validate(&out));
    }

    #[test]
    fn test_onehot_name_clash_is_reported() {
        let input = RecordBatch::new(
            vec!["class".into(), "a".into(), "a_b".into()],
            vec![
                vec![json!("e"), json!("b_c"), json!("c")],
                vec![json!("p"), json!("x"), json!("d")],
            ],
        )
        .unwrap();
        let mut engineer = FeatureEngineer::default();
        let err = engineer.transform(&input).unwrap_err();
        let EtlError::Transform(msg) = &err else {
            panic!("expected a transform error, got {err:?}");
        };
        assert!(msg.contains("'a_b_c'"), "{msg}");
        assert!(msg.contains("'a'") && msg.contains("'a_b'"), "{msg}");
    }

    #[test]
    fn test_onehot_exactly_one_indicator_per_feature() {
        let mut engineer = FeatureEngineer::default();
        let out = engineer.transform(&mushrooms()).unwrap();
        let odor: Vec<usize> = (0..out.column_count())
            .filter(|&i| out.columns[i].starts_with("odor_"))
            .collect();
        for row in &out.rows {
            let hot = odor.iter().filter(|&&i| row[i] == json!(true)).count();
            assert_eq!(hot, 1);
        }
    }

    #[test]
    fn test_label_encoding_keeps_encoders() {
        let mut engineer = FeatureEngineer::new(FeatureConfig {
            categorical_encoding: CategoricalEncoding::Label,
            feature_scaling: false,
            feature_selection: false,
            ..Default::default()
        });
        let out = engineer.transform(&mushrooms()).unwrap();
        assert_eq!(out.columns, vec!["odor", "cap-color", "class"]);
        assert_eq!(out.rows[0][0], json!(2));
        assert_eq!(out.rows[2][0], json!(0));
        assert_eq!(engineer.label_encoders()["odor"].classes, vec!["a", "f", "n"]);
    }

    #[test]
    fn test_target_encoding_codes_missing_as_minus_one() {
        let input = RecordBatch::new(
            vec!["odor".into()],
            vec![vec![json!("n")], vec![Value::Null]],
        )
        .unwrap();
        let mut engineer = FeatureEngineer::new(FeatureConfig {
            categorical_encoding: CategoricalEncoding::Target,
            feature_scaling: false,
            ..Default::default()
        });
        let out = engineer.transform(&input).unwrap();
        assert_eq!(out.rows, vec![vec![json!(0)], vec![json!(-1)]]);
        assert_eq!(engineer.feature_stats().target_encoded_columns, Some(1));
    }

    #[test]
    fn test_interactions_capped() {
        let columns: Vec<String> = (0..6).map(|i| format!("n{i}")).collect();
        let rows = vec![(0..6).map(|i| json!(i + 1)).collect()];
        let input = RecordBatch::new(columns, rows).unwrap();
        let mut engineer = FeatureEngineer::new(FeatureConfig {
            create_interactions: true,
            feature_scaling: false,
            feature_selection: false,
            ..Default::default()
        });
        let out = engineer.transform(&input).unwrap();
        assert_eq!(engineer.feature_stats().interactions_created, Some(MAX_INTERACTIONS));
        assert_eq!(out.column_count(), 6 + MAX_INTERACTIONS);
        assert_eq!(out.columns[6], "n0_x_n1");
        assert_eq!(out.rows[0][6], json!(2));
    }

    #[test]
    fn test_scaling_population_std_and_constant_column() {
        let input = RecordBatch::new(
            vec!["width".into(), "flat".into()],
            vec![vec![json!(1.0), json!(5)], vec![json!(3.0), json!(5)]],
        )
        .unwrap();
        let mut engineer = FeatureEngineer::new(FeatureConfig {
            feature_selection: false,
            ..Default::default()
        });
        let out = engineer.transform(&input).unwrap();
        assert_eq!(out.rows[0], vec![json!(-1.0), json!(0.0)]);
        assert_eq!(out.rows[1], vec![json!(1.0), json!(0.0)]);
        let scaler = engineer.scaler().unwrap();
        assert_eq!(scaler.means, vec![2.0, 5.0]);
        assert_eq!(scaler.scales, vec![1.0, 1.0]);
    }

    #[test]
    fn test_selection_keeps_informative_columns() {
        let rows: Vec<Vec<Value>> = (0..20)
            .map(|i| {
                let class = if i < 10 { "e" } else { "p" };
                let signal = if i < 10 { 0.0 } else { 10.0 };
                vec![json!(class), json!(signal), json!(1.0), json!("x")]
            })
            .collect();
        let input = RecordBatch::new(
            vec!["class".into(), "signal".into(), "noise".into(), "tag".into()],
            rows,
        )
        .unwrap();
        let mut engineer = FeatureEngineer::new(FeatureConfig {
            n_features: 1,
            feature_scaling: false,
            categorical_encoding: CategoricalEncoding::Label,
            ..Default::default()
        });
        let out = engineer.transform(&input).unwrap();
        // "tag" is label-encoded to a numeric constant and scores zero.
        assert_eq!(out.columns, vec!["signal", "class"]);
        let importance = engineer.get_feature_importance();
        assert!((importance["signal"] - std::f64::consts::LN_2).abs() < 1e-9);
    }

    #[test]
    fn test_missing_target_skips_selection() {
        let input = RecordBatch::new(vec!["odor".into()], vec![vec![json!("n")]]).unwrap();
        let mut engineer = FeatureEngineer::default();
        let out = engineer.transform(&input).unwrap();
        assert_eq!(out.columns, vec!["odor_n"]);
        assert!(engineer.get_feature_importance().is_empty());
    }

    #[test]
    fn test_mutual_information_independent_is_zero() {
        let feature = [json!(1.0), json!(1.0), json!(2.0), json!(2.0)];
        let refs: Vec<&Value> = feature.iter().collect();
        let target = [json!("e"), json!("p"), json!("e"), json!("p")];
        assert!(mutual_information(&refs, &target).abs() < 1e-12);
    }
}

//! Central finite-difference derivatives of engine outputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::{CambError, Result},
    execution::{Table, Transport},
    params::{Overrides, ParamStore},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivativeResult {
    /// d(table)/d(param); column 0 is the untouched index column
    pub tables: BTreeMap<String, Table>,
    /// Engine logs of the (low, high) runs
    pub logs: (String, String),
}

impl DerivativeResult {
    pub fn get(&self, key: &str) -> Option<&Table> {
        self.tables.get(key)
    }
}

/// Runs the engine at `x0 - epsilon/2` and `x0 + epsilon/2` and returns
/// `(high - low) / epsilon` for every table both runs produced.
pub async fn derivative<T: Transport>(
    store: &ParamStore,
    transport: &T,
    param: &str,
    overrides: &Overrides,
    epsilon: f64,
) -> Result<DerivativeResult> {
    if !epsilon.is_finite() || epsilon == 0.0 {
        return Err(CambError::InvalidEpsilon(epsilon));
    }
    let mut params = store.merge(overrides)?;
    let raw = params
        .get(param)
        .ok_or_else(|| CambError::MissingParameter(param.to_string()))?;
    let x0: f64 = raw.trim().parse().map_err(|_| CambError::NonNumericParameter {
        name: param.to_string(),
        value: raw.clone(),
    })?;

    info!("Differentiating with respect to {} at {} (epsilon {})", param, x0, epsilon);
    params.insert(param.to_string(), (x0 - epsilon / 2.0).to_string());
    let low = transport.execute(&params).await?;
    params.insert(param.to_string(), (x0 + epsilon / 2.0).to_string());
    let high = transport.execute(&params).await?;

    let mut tables = BTreeMap::new();
    for (key, lo) in &low.tables {
        let Some(hi) = high.tables.get(key) else {
            warn!("{} missing from the high run, dropping it", key);
            continue;
        };
        match lo.zip_with_index(hi, |l, h| (h - l) / epsilon) {
            Some(d) => {
                tables.insert(key.clone(), d);
            }
            None => warn!(
                "{} changed shape between runs ({:?} vs {:?}), dropping it",
                key,
                lo.shape(),
                hi.shape()
            ),
        }
    }
    for key in high.tables.keys().filter(|k| !low.tables.contains_key(*k)) {
        warn!("{} missing from the low run, dropping it", key);
    }

    Ok(DerivativeResult {
        tables,
        logs: (low.log, high.log),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        execution::ExecutionResult,
        params::{DocumentSource, Params},
    };
    use std::sync::Mutex;

    /// Produces `[i, 2x]` rows for i in 0..4 where x is the `x` parameter.
    struct Linear {
        seen: Mutex<Vec<f64>>,
        drop_when_above: Option<f64>,
    }

    impl Linear {
        fn new() -> Self {
            Self { seen: Mutex::new(Vec::new()), drop_when_above: None }
        }
    }

    impl Transport for Linear {
        async fn execute(&self, params: &Params) -> Result<ExecutionResult> {
            let x: f64 = params["x"].parse().unwrap();
            self.seen.lock().unwrap().push(x);
            let rows = (0..4).map(|i| vec![i as f64, 2.0 * x]).collect();
            let mut tables = BTreeMap::new();
            tables.insert("scalar".to_string(), Table::from_rows(rows).unwrap());
            if self.drop_when_above.map_or(true, |limit| x < limit) {
                let rows = (0..2).map(|i| vec![10.0 + i as f64, x * x, -x]).collect();
                tables.insert("lensed".to_string(), Table::from_rows(rows).unwrap());
            }
            Ok(ExecutionResult { tables, log: format!("x={x}"), exit_code: Some(0) })
        }
    }

    fn store() -> ParamStore {
        ParamStore::new(DocumentSource::Text("x = 1.5\nname = planck\n".into())).unwrap()
    }

    #[tokio::test]
    async fn test_derivative_of_linear_output() {
        let t = Linear::new();
        let d = derivative(&store(), &t, "x", &Overrides::new(), 0.01).await.unwrap();

        let scalar = d.get("scalar").unwrap();
        assert_eq!(scalar.column(0), vec![0.0, 1.0, 2.0, 3.0]);
        for v in scalar.column(1) {
            assert!((v - 2.0).abs() < 1e-9, "got {v}");
        }
        let lensed = d.get("lensed").unwrap();
        assert_eq!(lensed.column(0), vec![10.0, 11.0]);
        for v in lensed.column(1) {
            assert!((v - 3.0).abs() < 1e-6, "got {v}");
        }
        for v in lensed.column(2) {
            assert!((v + 1.0).abs() < 1e-9, "got {v}");
        }

        let seen = t.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert!((seen[0] - 1.495).abs() < 1e-12 && (seen[1] - 1.505).abs() < 1e-12);
        assert!(d.logs.0.starts_with("x=1.49"));
        assert!(d.logs.1.starts_with("x=1.50"));
    }

    #[tokio::test]
    async fn test_overrides_set_the_expansion_point() {
        let t = Linear::new();
        let mut o = Overrides::new();
        o.insert("x".into(), 4i64.into());
        derivative(&store(), &t, "x", &o, 1.0).await.unwrap();
        assert_eq!(*t.seen.lock().unwrap(), vec![3.5, 4.5]);
    }

    #[tokio::test]
    async fn test_key_missing_from_one_run_is_omitted() {
        let t = Linear { drop_when_above: Some(1.5), ..Linear::new() };
        let d = derivative(&store(), &t, "x", &Overrides::new(), 0.01).await.unwrap();
        assert!(d.get("scalar").is_some());
        assert!(d.get("lensed").is_none());
    }

    #[tokio::test]
    async fn test_non_numeric_parameter() {
        let err = derivative(&store(), &Linear::new(), "name", &Overrides::new(), 0.1)
            .await
            .unwrap_err();
        assert!(matches!(err, CambError::NonNumericParameter { .. }));
        assert!(err.to_string().contains("'name'=planck"));
    }

    #[tokio::test]
    async fn test_missing_parameter_and_bad_epsilon() {
        let err = derivative(&store(), &Linear::new(), "nope", &Overrides::new(), 0.1)
            .await
            .unwrap_err();
        assert!(matches!(err, CambError::MissingParameter(_)));

        for eps in [0.0, f64::NAN, f64::INFINITY] {
            let err = derivative(&store(), &Linear::new(), "x", &Overrides::new(), eps)
                .await
                .unwrap_err();
            assert!(matches!(err, CambError::InvalidEpsilon(_)));
        }
    }
}

//! 翻译入口
//!
//! 词法分析 → 语法分析 → 作用域解析 → IR 降级 → 绑定变量解析 → SQL 生成,
//! 任一阶段失败即返回该阶段的错误，不产生部分语句。

use crate::bind::{references, BindReference, BindVars, BindingEntry, BindingTable, BoundValue};
use crate::config::TranslatorConfig;
use crate::error::Result;
use crate::ir::{Lowerer, Pipeline};
use crate::metrics::{global_metrics, Metrics};
use crate::query::{resolve, tokenize, AqlParser, Query, Resolution};
use crate::sql::{Generator, StatementKind};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// A translated statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Translation {
    pub sql: String,
    /// Named value parameters in the order they were bound
    pub parameters: IndexMap<String, Value>,
    /// Parameters referenced by `sql` whose values are supplied at execution time
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deferred: Vec<String>,
    pub kind: StatementKind,
}

pub struct Translator {
    config: TranslatorConfig,
    metrics: Arc<Metrics>,
}

impl Translator {
    pub fn new(config: TranslatorConfig) -> Self {
        Self {
            config,
            metrics: global_metrics(),
        }
    }

    /// Record into a private metrics instance instead of the global one
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Translate one AQL query
    pub fn translate(&self, source: &str, vars: &BindVars) -> Result<Translation> {
        let timer = self.metrics.record_start();
        match self.run(source, vars) {
            Ok(translation) => {
                self.metrics.record_success(timer, translation.sql.len());
                Ok(translation)
            }
            Err(err) => {
                warn!(stage = err.stage(), error = %err, "translation failed");
                self.metrics.record_failure(timer, err.stage());
                Err(err)
            }
        }
    }

    /// Translate independent queries in parallel; results keep input order
    pub fn translate_all(&self, queries: &[(String, BindVars)]) -> Vec<Result<Translation>> {
        queries
            .par_iter()
            .map(|(source, vars)| self.translate(source, vars))
            .collect()
    }

    /// Lower a query without binding or generating, for inspection
    pub fn explain(&self, source: &str) -> Result<Pipeline> {
        let (_, query, resolution) = self.front_end(source)?;
        let pipeline = Lowerer::new(&resolution).lower(&query)?;
        Ok(pipeline)
    }

    fn front_end(&self, source: &str) -> Result<(Vec<BindReference>, Query, Resolution)> {
        let tokens = tokenize(source)?;
        let refs = references(&tokens);
        debug!(tokens = tokens.len(), bind_refs = refs.len(), "lexed");

        let query = AqlParser::new(tokens)
            .with_max_depth(self.config.max_nesting_depth)
            .parse()?;
        debug!(clauses = query.clauses.len(), "parsed");

        let resolution = resolve(&query)?;
        debug!(bindings = resolution.bindings().len(), "scopes resolved");
        Ok((refs, query, resolution))
    }

    fn run(&self, source: &str, vars: &BindVars) -> Result<Translation> {
        let (refs, query, resolution) = self.front_end(source)?;
        let pipeline = Lowerer::new(&resolution).lower(&query)?;
        debug!(stages = pipeline.stages.len(), "lowered");

        let table = BindingTable::resolve(&refs, vars, self.config.allow_deferred_parameters)?;
        let deferred = table.deferred();
        if !deferred.is_empty() {
            debug!(deferred = ?deferred, "deferred parameters");
        }

        let statement = Generator::new(&table, &self.config).generate(&pipeline)?;
        debug!(kind = statement.kind.as_str(), "generated");

        let mut parameters = IndexMap::new();
        for name in &statement.parameters {
            if let Some(BindingEntry {
                value: BoundValue::Literal(value),
                ..
            }) = table.value(name)
            {
                parameters.insert(name.clone(), value.clone());
            }
        }
        let deferred = deferred
            .into_iter()
            .filter(|name| statement.parameters.contains(name))
            .collect();

        Ok(Translation {
            sql: statement.text,
            parameters,
            deferred,
            kind: statement.kind,
        })
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(TranslatorConfig::default())
    }
}

/// Translate with the default configuration
pub fn translate(source: &str, vars: &BindVars) -> Result<Translation> {
    Translator::default().translate(source, vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BindingErrorKind, Error, LoweringErrorKind, ParseErrorKind, ScopeErrorKind};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use serde_json::json;
    use std::io::Write;

    fn translator() -> Translator {
        Translator::default().with_metrics(Arc::new(Metrics::new()))
    }

    fn sql(source: &str) -> String {
        translator().translate(source, &BindVars::new()).unwrap().sql
    }

    #[test]
    fn test_filter_return() {
        assert_eq!(
            sql("FOR u IN users FILTER u.active == true RETURN u.name"),
            "SELECT name FROM users WHERE active = true"
        );
    }

    #[test]
    fn test_collect_with_count() {
        let t = translator()
            .translate(
                "FOR u IN users COLLECT dept = u.department WITH COUNT INTO cnt RETURN {dept, cnt}",
                &BindVars::new(),
            )
            .unwrap();
        assert_eq!(
            t.sql,
            "SELECT department AS dept, count(*) AS cnt FROM users GROUP BY department"
        );
        assert_eq!(t.kind, StatementKind::Select);
    }

    #[test]
    fn test_bounded_traversal() {
        let t = translator()
            .translate(
                "FOR v, e IN 1..2 OUTBOUND \"accounts/1\" transfers RETURN v",
                &BindVars::new(),
            )
            .unwrap();
        assert_eq!(t.kind, StatementKind::Match);
        assert!(t.sql.starts_with("MATCH {type: accounts, as: _start"));
        assert!(t.sql.contains("while: ($depth < 2)"));
    }

    #[test]
    fn test_upsert_rejected_with_span() {
        let source = "UPSERT {name: 'a'} INSERT {name: 'a'} UPDATE {} IN users";
        let err = translator().translate(source, &BindVars::new()).unwrap_err();
        match err {
            Error::Lowering(e) => {
                assert_eq!(e.kind, LoweringErrorKind::UnsupportedConstruct);
                assert_eq!(e.span.start, 0);
            }
            other => panic!("Expected lowering error, got {:?}", other),
        }
    }

    #[test]
    fn test_forward_reference() {
        let err = translator()
            .translate("LET a = b LET b = 1 RETURN a", &BindVars::new())
            .unwrap_err();
        match err {
            Error::Scope(e) => assert_eq!(e.kind, ScopeErrorKind::UndefinedVariable),
            other => panic!("Expected scope error, got {:?}", other),
        }
    }

    #[test]
    fn test_bind_vars() {
        let vars = BindVars::from_json(json!({"@coll": "users", "min": 21, "unused": 1})).unwrap();
        let t = translator()
            .translate("FOR u IN @@coll FILTER u.age >= @min RETURN u", &vars)
            .unwrap();
        assert_eq!(t.sql, "SELECT * FROM users WHERE age >= :min");
        assert_eq!(t.parameters.len(), 1);
        assert_eq!(t.parameters.get("min"), Some(&json!(21)));

        let err = translator()
            .translate("FOR u IN users FILTER u.age >= @min RETURN u", &BindVars::new())
            .unwrap_err();
        match err {
            Error::Binding(e) => assert_eq!(e.kind, BindingErrorKind::MissingParameter),
            other => panic!("Expected binding error, got {:?}", other),
        }
    }

    #[test]
    fn test_long_filter_chain_is_an_error() {
        let terms: Vec<String> = (0..1000).map(|i| format!("u.id == {}", i)).collect();
        let source = format!("FOR u IN users FILTER {} RETURN u", terms.join(" || "));
        match translator().translate(&source, &BindVars::new()) {
            Err(Error::Parse(e)) => assert_eq!(e.kind, ParseErrorKind::UnsupportedConstruct),
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_array_parameter_sources() {
        let vars = BindVars::from_json(json!({"words": ["a", "b"], "ids": ["m1"]})).unwrap();
        let t = translator()
            .translate("FOR word IN @words RETURN LOWER(word)", &vars)
            .unwrap();
        assert_eq!(
            t.sql,
            "SELECT word.toLowerCase() FROM (SELECT :words AS word UNWIND word)"
        );
        assert_eq!(t.parameters.get("words"), Some(&json!(["a", "b"])));

        let t = translator()
            .translate("FOR msgId IN @ids UPDATE msgId WITH {read: true} IN messages", &vars)
            .unwrap();
        assert_eq!(t.sql, "UPDATE messages SET read = true WHERE _key IN :ids");
        assert_eq!(t.kind, StatementKind::Update);
    }

    #[test]
    fn test_deferred_parameters() {
        let config = TranslatorConfig::default().with_deferred_parameters(true);
        let t = Translator::new(config)
            .with_metrics(Arc::new(Metrics::new()))
            .translate("FOR u IN users FILTER u.age >= @min RETURN u", &BindVars::new())
            .unwrap();
        assert!(t.parameters.is_empty());
        assert_eq!(t.deferred, vec!["min".to_string()]);
    }

    #[test]
    fn test_explain() {
        let pipeline = translator()
            .explain("FOR u IN users FILTER u.active == true RETURN u.name")
            .unwrap();
        assert_eq!(
            pipeline.to_string(),
            "[Source(users AS u), Filter((u.active == true)), Project(u.name)]"
        );
    }

    #[test]
    fn test_translation_serializes() {
        let vars = BindVars::new().with_value("n", 3);
        let t = translator()
            .translate("FOR u IN users LIMIT @n RETURN u", &vars)
            .unwrap();
        let value = serde_json::to_value(&t).unwrap();
        assert_eq!(value["sql"], json!("SELECT * FROM users LIMIT :n"));
        assert_eq!(value["parameters"], json!({"n": 3}));
        assert_eq!(value["kind"], json!("select"));
        assert!(value.get("deferred").is_none());
    }

    #[test]
    fn test_metrics_recorded() {
        let metrics = Arc::new(Metrics::new());
        let t = Translator::default().with_metrics(metrics.clone());
        t.translate("FOR u IN users RETURN u", &BindVars::new()).unwrap();
        assert!(t.translate("FOR u IN", &BindVars::new()).is_err());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_translations, 2);
        assert_eq!(snapshot.success_translations, 1);
        assert!(snapshot.stage_failures.contains(&("parse".to_string(), 1)));
    }

    #[test]
    fn test_translate_all_keeps_order() {
        let queries: Vec<(String, BindVars)> = ["users", "orders", "items"]
            .iter()
            .map(|c| (format!("FOR d IN {} RETURN d._key", c), BindVars::new()))
            .collect();
        let results = translator().translate_all(&queries);
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[1].as_ref().unwrap().sql,
            "SELECT _key FROM orders"
        );
    }

    #[test]
    fn test_generated_queries_are_idempotent() {
        let mut rng = StdRng::seed_from_u64(7);
        let collections = ["users", "orders", "accounts"];
        let fields = ["age", "name", "total", "active"];
        let ops = ["==", "!=", "<", ">="];
        let t = translator();

        for _ in 0..50 {
            let collection = collections.choose(&mut rng).unwrap();
            let mut query = format!("FOR d IN {}", collection);
            for _ in 0..rng.gen_range(0..3) {
                query.push_str(&format!(
                    " FILTER d.{} {} {}",
                    fields.choose(&mut rng).unwrap(),
                    ops.choose(&mut rng).unwrap(),
                    rng.gen_range(0..100)
                ));
            }
            if rng.gen_bool(0.5) {
                query.push_str(&format!(" SORT d.{} DESC", fields.choose(&mut rng).unwrap()));
            }
            if rng.gen_bool(0.3) {
                query.push_str(&format!(" LIMIT {}", rng.gen_range(1..20)));
            }
            query.push_str(&format!(" RETURN d.{}", fields.choose(&mut rng).unwrap()));

            let first = t.translate(&query, &BindVars::new()).unwrap();
            let second = Translator::default()
                .with_metrics(Arc::new(Metrics::new()))
                .translate(&query, &BindVars::new())
                .unwrap();
            assert_eq!(first, second, "query: {}", query);
        }
    }

    #[test]
    fn test_translator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Translator>();
        assert_send_sync::<Translation>();
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"parameter_prefix": "$"}}"#).unwrap();
        let config = TranslatorConfig::from_file(file.path()).unwrap();
        let vars = BindVars::new().with_value("x", 1);
        let t = Translator::new(config)
            .with_metrics(Arc::new(Metrics::new()))
            .translate("FOR u IN users FILTER u.a == @x RETURN u", &vars)
            .unwrap();
        assert_eq!(t.sql, "SELECT * FROM users WHERE a = $x");
    }
}

//! AQL → ArcadeDB function table
//!
//! Lookup is by upper-cased AQL name (namespaced names such as `AQL::TO_STRING`
//! keep their prefix). Names missing from the table are rejected by the generator.

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    /// `name(args...)`
    Rename(&'static str),
    /// `first.name(rest...)`
    Method(&'static str),
    Special(Special),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Special {
    /// `LENGTH` / `COUNT`: `count(*)` over a subquery, `.size()` otherwise
    Size,
    First,
    Has,
    Like,
    IsNull,
    RegexTest,
    Document,
    Substring,
    Contains,
    ParseIdentifier,
    /// `DATE_ADD(d, n, unit)` → `date_add(d, 'unit', n)`
    DateAdd,
    /// Same as `DateAdd` with the amount negated
    DateSubtract,
    /// `DATE_DIFF(a, b, unit)` → `datediff('unit', a, b)`
    DateDiff,
    DateIso8601,
    /// Single date component through `format`, as an integer
    DatePart(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub mapping: Mapping,
    pub min_args: usize,
    pub max_args: usize,
}

impl FunctionSpec {
    const fn new(mapping: Mapping, min_args: usize, max_args: usize) -> Self {
        Self {
            mapping,
            min_args,
            max_args,
        }
    }

    pub fn accepts(&self, arity: usize) -> bool {
        arity >= self.min_args && arity <= self.max_args
    }
}

const VARIADIC: usize = usize::MAX;

static FUNCTIONS: Lazy<HashMap<&'static str, FunctionSpec>> = Lazy::new(|| {
    let entries: &[(&str, FunctionSpec)] = &[
        // 字符串
        ("CONCAT", FunctionSpec::new(Mapping::Rename("concat"), 1, VARIADIC)),
        ("LOWER", FunctionSpec::new(Mapping::Method("toLowerCase"), 1, 1)),
        ("UPPER", FunctionSpec::new(Mapping::Method("toUpperCase"), 1, 1)),
        ("TRIM", FunctionSpec::new(Mapping::Method("trim"), 1, 1)),
        ("SPLIT", FunctionSpec::new(Mapping::Method("split"), 2, 2)),
        ("SUBSTRING", FunctionSpec::new(Mapping::Special(Special::Substring), 2, 3)),
        ("CONTAINS", FunctionSpec::new(Mapping::Special(Special::Contains), 2, 2)),
        ("LIKE", FunctionSpec::new(Mapping::Special(Special::Like), 2, 3)),
        ("REGEX_TEST", FunctionSpec::new(Mapping::Special(Special::RegexTest), 2, 3)),
        ("TO_STRING", FunctionSpec::new(Mapping::Method("asString"), 1, 1)),
        ("AQL::TO_STRING", FunctionSpec::new(Mapping::Method("asString"), 1, 1)),
        // 类型转换
        ("TO_NUMBER", FunctionSpec::new(Mapping::Method("asFloat"), 1, 1)),
        ("TO_BOOL", FunctionSpec::new(Mapping::Method("asBoolean"), 1, 1)),
        ("IS_NULL", FunctionSpec::new(Mapping::Special(Special::IsNull), 1, 1)),
        ("NOT_NULL", FunctionSpec::new(Mapping::Rename("coalesce"), 1, VARIADIC)),
        ("COALESCE", FunctionSpec::new(Mapping::Rename("coalesce"), 1, VARIADIC)),
        // 数组与文档
        ("LENGTH", FunctionSpec::new(Mapping::Special(Special::Size), 1, 1)),
        ("COUNT", FunctionSpec::new(Mapping::Special(Special::Size), 1, 1)),
        ("FIRST", FunctionSpec::new(Mapping::Special(Special::First), 1, 1)),
        ("LAST", FunctionSpec::new(Mapping::Method("last"), 1, 1)),
        ("UNIQUE", FunctionSpec::new(Mapping::Method("asSet"), 1, 1)),
        ("KEYS", FunctionSpec::new(Mapping::Method("keys"), 1, 2)),
        ("ATTRIBUTES", FunctionSpec::new(Mapping::Method("keys"), 1, 3)),
        ("VALUES", FunctionSpec::new(Mapping::Method("values"), 1, 2)),
        ("HAS", FunctionSpec::new(Mapping::Special(Special::Has), 2, 2)),
        ("MERGE", FunctionSpec::new(Mapping::Method("merge"), 2, VARIADIC)),
        ("UNION", FunctionSpec::new(Mapping::Rename("unionAll"), 2, VARIADIC)),
        ("DOCUMENT", FunctionSpec::new(Mapping::Special(Special::Document), 1, 1)),
        (
            "PARSE_IDENTIFIER",
            FunctionSpec::new(Mapping::Special(Special::ParseIdentifier), 1, 1),
        ),
        // 数值
        ("SUM", FunctionSpec::new(Mapping::Rename("sum"), 1, 1)),
        ("AVERAGE", FunctionSpec::new(Mapping::Rename("avg"), 1, 1)),
        ("AVG", FunctionSpec::new(Mapping::Rename("avg"), 1, 1)),
        ("MIN", FunctionSpec::new(Mapping::Rename("min"), 1, VARIADIC)),
        ("MAX", FunctionSpec::new(Mapping::Rename("max"), 1, VARIADIC)),
        ("ABS", FunctionSpec::new(Mapping::Rename("abs"), 1, 1)),
        ("RAND", FunctionSpec::new(Mapping::Rename("rand"), 0, 0)),
        // 日期
        ("DATE_NOW", FunctionSpec::new(Mapping::Rename("sysdate"), 0, 0)),
        ("DATE_TIMESTAMP", FunctionSpec::new(Mapping::Rename("date"), 1, 2)),
        ("DATE_FORMAT", FunctionSpec::new(Mapping::Method("format"), 2, 2)),
        ("DATE_ADD", FunctionSpec::new(Mapping::Special(Special::DateAdd), 3, 3)),
        ("DATE_SUBTRACT", FunctionSpec::new(Mapping::Special(Special::DateSubtract), 3, 3)),
        ("DATE_DIFF", FunctionSpec::new(Mapping::Special(Special::DateDiff), 3, 4)),
        ("DATE_ISO8601", FunctionSpec::new(Mapping::Special(Special::DateIso8601), 1, 1)),
        ("DATE_YEAR", FunctionSpec::new(Mapping::Special(Special::DatePart("yyyy")), 1, 1)),
        ("DATE_MONTH", FunctionSpec::new(Mapping::Special(Special::DatePart("MM")), 1, 1)),
        ("DATE_DAY", FunctionSpec::new(Mapping::Special(Special::DatePart("dd")), 1, 1)),
        ("DATE_HOUR", FunctionSpec::new(Mapping::Special(Special::DatePart("HH")), 1, 1)),
        ("DATE_MINUTE", FunctionSpec::new(Mapping::Special(Special::DatePart("mm")), 1, 1)),
        ("DATE_SECOND", FunctionSpec::new(Mapping::Special(Special::DatePart("ss")), 1, 1)),
        // 其他
        ("UUID", FunctionSpec::new(Mapping::Rename("uuid"), 0, 0)),
    ];

    entries.iter().copied().collect()
});

/// Mapping for an upper-cased AQL function name
pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.get(name)
}

/// Every mapped AQL function name, sorted
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = FUNCTIONS.keys().copied().collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("AVERAGE").unwrap().mapping, Mapping::Rename("avg"));
        assert_eq!(
            lookup("LENGTH").unwrap().mapping,
            Mapping::Special(Special::Size)
        );
        assert!(lookup("AQL::TO_STRING").is_some());
        assert_eq!(
            lookup("DATE_SUBTRACT").unwrap().mapping,
            Mapping::Special(Special::DateSubtract)
        );
        assert_eq!(
            lookup("DATE_HOUR").unwrap().mapping,
            Mapping::Special(Special::DatePart("HH"))
        );
        assert_eq!(lookup("UNION").unwrap().mapping, Mapping::Rename("unionAll"));
        assert!(lookup("RAND").unwrap().accepts(0));
        assert!(!lookup("MERGE").unwrap().accepts(1));
        assert!(lookup("GEO_DISTANCE").is_none());
        assert!(lookup("average").is_none());
    }

    #[test]
    fn test_arity() {
        let lower = lookup("LOWER").unwrap();
        assert!(lower.accepts(1));
        assert!(!lower.accepts(2));
        assert!(lookup("CONCAT").unwrap().accepts(5));
        assert!(lookup("DATE_NOW").unwrap().accepts(0));
    }

    #[test]
    fn test_names_sorted() {
        let names = names();
        assert!(names.windows(2).all(|w| w[0] <= w[1]));
        assert!(names.contains(&"UPPER"));
    }
}

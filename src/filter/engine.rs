use std::collections::HashSet;

use crate::record::{Field, Record};

use super::{FieldPatterns, FilterExpression, FilterSet, MatchPolicy};

/// Keep the records matched by at least one expression of `filters`.
///
/// An empty set returns `records` untouched. Otherwise the result is the
/// union of every expression's matches, deduplicated by record id, in
/// first-seen order.
pub fn filter_records(records: Vec<Record>, filters: &FilterSet) -> Vec<Record> {
    if filters.is_empty() {
        return records;
    }

    let matchers: Vec<Matcher> = filters.expressions().iter().map(Matcher::new).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut keep: Vec<usize> = Vec::new();

    for matcher in &matchers {
        for (idx, record) in records.iter().enumerate() {
            if matcher.matches(record) && seen.insert(record.id.as_str()) {
                keep.push(idx);
            }
        }
    }

    log::info!(
        "Filtered {} songs by metadata",
        records.len().saturating_sub(keep.len())
    );

    let mut slots: Vec<Option<Record>> = records.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|idx| slots[idx].take()).collect()
}

/// One expression with its grouping and policies resolved up front.
struct Matcher {
    include: FieldPatterns,
    exclude: FieldPatterns,
    include_policy: MatchPolicy,
    exclude_policy: MatchPolicy,
}

impl Matcher {
    fn new(expr: &FilterExpression) -> Self {
        let (include, exclude) = expr.partition();
        let (include_policy, exclude_policy) = expr.policies();
        Self {
            include,
            exclude,
            include_policy,
            exclude_policy,
        }
    }

    /// Include then exclude, each side combined under its policy.
    fn matches(&self, record: &Record) -> bool {
        let included =
            self.include.is_empty() || side_matches(&self.include, self.include_policy, record);
        if !included {
            return false;
        }

        let excluded =
            !self.exclude.is_empty() && side_matches(&self.exclude, self.exclude_policy, record);
        !excluded
    }
}

/// Whether a single expression keeps `record`.
pub fn expression_matches(expr: &FilterExpression, record: &Record) -> bool {
    Matcher::new(expr).matches(record)
}

/// A field matches when any of its patterns does; fields are then combined
/// according to `policy`.
fn side_matches(groups: &FieldPatterns, policy: MatchPolicy, record: &Record) -> bool {
    let mut fields = groups
        .iter()
        .map(|(field, patterns)| field_matches(record, *field, patterns));

    match policy {
        MatchPolicy::Any => fields.any(|m| m),
        MatchPolicy::All => fields.all(|m| m),
    }
}

fn field_matches(record: &Record, field: Field, patterns: &[String]) -> bool {
    let Some(value) = record.value(field) else {
        return false;
    };
    let value = value.to_lowercase();
    patterns
        .iter()
        .any(|p| value.contains(&p.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: &str, artist: &str, album: &str) -> Record {
        Record {
            artist: Some(artist.into()),
            album: Some(album.into()),
            ..Record::remote(id)
        }
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    fn library() -> Vec<Record> {
        vec![
            song("1", "Foo", "Baz"),
            song("2", "Foo", "Bar"),
            song("3", "Qux", "Bar"),
            song("4", "The Foo Fighters", "Colour"),
        ]
    }

    #[test]
    fn empty_set_is_identity() {
        let records = library();
        assert_eq!(filter_records(records.clone(), &FilterSet::default()), records);
    }

    #[test]
    fn include_then_exclude() {
        let records = vec![
            song("1", "Foo", "Baz"),
            song("2", "Foo", "Bar"),
            Record {
                artist: Some("Qux".into()),
                ..Record::remote("3")
            },
        ];
        let set = FilterSet::parse(&["artist[Foo]-album[Bar]"]).unwrap();
        assert_eq!(ids(&filter_records(records, &set)), ["1"]);
    }

    #[test]
    fn single_include_is_case_insensitive_substring() {
        let set = FilterSet::parse(&["artist[foo]"]).unwrap();
        let result = filter_records(library(), &set);
        assert_eq!(ids(&result), ["1", "2", "4"]);
        assert!(result
            .iter()
            .all(|r| r.artist.as_deref().unwrap().to_lowercase().contains("foo")));
    }

    #[test]
    fn compound_include_requires_every_field() {
        let set = FilterSet::parse(&["artist[Foo]album[Bar]"]).unwrap();
        assert_eq!(ids(&filter_records(library(), &set)), ["2"]);
    }

    #[test]
    fn patterns_for_one_field_are_alternatives() {
        let set = FilterSet::parse(&["album[Baz]album[Colour]"]).unwrap();
        assert_eq!(ids(&filter_records(library(), &set)), ["1", "4"]);
    }

    #[test]
    fn exclude_only_expression_keeps_non_matching() {
        let set = FilterSet::parse(&["-album[Bar]"]).unwrap();
        assert_eq!(ids(&filter_records(library(), &set)), ["1", "4"]);
    }

    /// No include conditions means an `Any` include side, so two exclude
    /// fields must both match before a record drops.
    #[test]
    fn exclude_only_expression_with_two_fields_needs_both() {
        let records = vec![
            Record {
                title: Some("Intro".into()),
                ..song("1", "Foo", "Bar")
            },
            Record {
                title: Some("Outro".into()),
                ..song("2", "Foo", "Bar")
            },
            Record {
                title: Some("Intro".into()),
                ..song("3", "Foo", "Baz")
            },
        ];
        let set = FilterSet::parse(&["-album[Bar]-title[Intro]"]).unwrap();
        assert_eq!(ids(&filter_records(records, &set)), ["2", "3"]);
    }

    /// The exclude side takes the complement of the include policy: with a
    /// simple include, several excludes must all match before a record drops.
    #[test]
    fn asymmetric_policy_simple_include_narrows_exclusion() {
        let set = FilterSet::parse(&["artist[Foo]-album[Bar]-title[Intro]"]).unwrap();
        // record 2 matches album but has no title, so it stays
        assert_eq!(ids(&filter_records(library(), &set)), ["1", "2", "4"]);
    }

    /// With a compound include, any single exclude match drops the record.
    #[test]
    fn asymmetric_policy_compound_include_broadens_exclusion() {
        let records = vec![
            Record {
                title: Some("Intro".into()),
                ..song("1", "Foo", "Baz")
            },
            song("2", "Foo", "Bar"),
            song("3", "Foo", "Barn"),
            song("4", "Foo", "Baz"),
        ];
        let set = FilterSet::parse(&["artist[Foo]album[Ba]-album[Bar]-title[Intro]"]).unwrap();
        assert_eq!(ids(&filter_records(records, &set)), ["4"]);
    }

    #[test]
    fn union_across_expressions_without_duplicates() {
        let set = FilterSet::parse(&["album[Bar]", "artist[Foo]"]).unwrap();
        // first expression contributes 2, 3; second adds 1, 4
        assert_eq!(ids(&filter_records(library(), &set)), ["2", "3", "1", "4"]);
    }

    #[test]
    fn missing_field_never_matches_include() {
        let records = vec![Record::remote("bare"), song("1", "Foo", "Baz")];
        let set = FilterSet::parse(&["artist[]"]).unwrap();
        assert_eq!(ids(&filter_records(records, &set)), ["1"]);
    }

    #[test]
    fn numeric_fields_are_matched_as_text() {
        let records = vec![
            Record {
                track_number: Some(12),
                ..Record::remote("a")
            },
            Record {
                track_number: Some(3),
                ..Record::remote("b")
            },
        ];
        let set = FilterSet::parse(&["tracknumber[1]"]).unwrap();
        assert_eq!(ids(&filter_records(records, &set)), ["a"]);
    }
}

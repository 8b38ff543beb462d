use hashbrown::HashSet;
use tabmove::Predicate;

use crate::records::ArticleRecord;

/// Row filters over the article table; compose with `And`.
#[derive(Debug, Clone)]
pub enum ArticleFilter {
    All,
    Year(u16),
    YearRange(u16, u16),
    Venues(HashSet<String>),
    And(Vec<ArticleFilter>),
}

impl ArticleFilter {
    pub fn venues<'a, I: IntoIterator<Item = &'a str>>(ids: I) -> Self {
        Self::Venues(ids.into_iter().map(str::to_string).collect())
    }

    pub fn and(self, other: ArticleFilter) -> Self {
        match (self, other) {
            (Self::All, o) | (o, Self::All) => o,
            (Self::And(mut v), Self::And(w)) => {
                v.extend(w);
                Self::And(v)
            }
            (Self::And(mut v), o) => {
                v.push(o);
                Self::And(v)
            }
            (s, o) => Self::And(vec![s, o]),
        }
    }
}

impl Predicate<ArticleRecord> for ArticleFilter {
    fn test(&self, row: &ArticleRecord) -> bool {
        match self {
            Self::All => true,
            Self::Year(y) => row.publication_year == *y,
            Self::YearRange(lo, hi) => (*lo..=*hi).contains(&row.publication_year),
            Self::Venues(ids) => ids.contains(row.venue_id.as_str()),
            Self::And(parts) => parts.iter().all(|p| p.test(row)),
        }
    }
}

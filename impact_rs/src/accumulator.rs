use std::collections::BTreeMap;

use tabmove::Accumulator;

use crate::{
    common::round6,
    records::{ArticleRecord, OaStatus},
};

/// Per-document indicators of a set of articles.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DocMetrics {
    pub num_documents: u64,
    pub fwci_avg: f64,
    pub avg_percentile: f64,
    pub pct_top_10: f64,
    pub pct_top_1: f64,
    /// Shares in `OaStatus::ALL` order.
    pub pct_oa: [f64; 6],
}

/// Running sums over article records.
///
/// Missing fwci or percentile values add nothing to the sums but the record
/// still counts as a document, so averages are taken over all documents.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecordAccumulator {
    count: u64,
    fwci_sum: f64,
    percentile_sum: f64,
    top_10: u64,
    top_1: u64,
    oa: [u64; 6],
}

impl RecordAccumulator {
    pub fn push(&mut self, rec: &ArticleRecord) {
        self.count += 1;
        self.fwci_sum += rec.fwci.unwrap_or(0.0);
        self.percentile_sum += rec.citation_normalized_percentile.unwrap_or(0.0);
        self.top_10 += rec.is_in_top_10_percent as u64;
        self.top_1 += rec.is_in_top_1_percent as u64;
        if let Some(status) = rec.oa_status {
            self.oa[status.index()] += 1;
        }
    }

    pub fn merge(&mut self, other: &RecordAccumulator) {
        self.count += other.count;
        self.fwci_sum += other.fwci_sum;
        self.percentile_sum += other.percentile_sum;
        self.top_10 += other.top_10;
        self.top_1 += other.top_1;
        for (a, b) in self.oa.iter_mut().zip(other.oa) {
            *a += b;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finalize(&self) -> DocMetrics {
        if self.count == 0 {
            return DocMetrics::default();
        }
        let n = self.count as f64;
        let pct = |c: u64| round6(c as f64 * 100.0 / n);
        let mut pct_oa = [0.0; 6];
        for s in OaStatus::ALL {
            pct_oa[s.index()] = share_floor6(self.oa[s.index()], self.count);
        }
        DocMetrics {
            num_documents: self.count,
            fwci_avg: round6(self.fwci_sum / n),
            avg_percentile: round6(self.percentile_sum / n),
            pct_top_10: pct(self.top_10),
            pct_top_1: pct(self.top_1),
            pct_oa,
        }
    }
}

impl Accumulator<ArticleRecord> for RecordAccumulator {
    fn add(&mut self, batch: &[&ArticleRecord]) {
        for rec in batch {
            self.push(rec);
        }
    }
}

/// `100 * part / whole` truncated to 6 decimals, so that shares of disjoint
/// parts never add up past 100.
fn share_floor6(part: u64, whole: u64) -> f64 {
    let millionths = part as u128 * 100_000_000 / whole as u128;
    millionths as f64 / 1e6
}

/// One accumulator per publication year.
#[derive(Debug, Clone, Default)]
pub struct YearlyAccumulator {
    years: BTreeMap<u16, RecordAccumulator>,
}

impl YearlyAccumulator {
    pub fn year(&self, year: u16) -> RecordAccumulator {
        self.years.get(&year).copied().unwrap_or_default()
    }

    /// Everything published within `[start, end]`.
    pub fn span(&self, start: u16, end: u16) -> RecordAccumulator {
        let mut acc = RecordAccumulator::default();
        if start > end {
            return acc;
        }
        for y in self.years.range(start..=end).map(|(_, a)| a) {
            acc.merge(y);
        }
        acc
    }

    pub fn year_range(&self) -> Option<(u16, u16)> {
        let lo = *self.years.keys().next()?;
        let hi = *self.years.keys().next_back()?;
        Some((lo, hi))
    }
}

impl Accumulator<ArticleRecord> for YearlyAccumulator {
    fn add(&mut self, batch: &[&ArticleRecord]) {
        for rec in batch {
            self.years
                .entry(rec.publication_year)
                .or_default()
                .push(rec);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    pub fn article(
        id: &str,
        venue: &str,
        year: u16,
        fwci: Option<f64>,
        percentile: Option<f64>,
        top: (bool, bool),
        oa: Option<OaStatus>,
    ) -> ArticleRecord {
        ArticleRecord {
            id: id.to_string(),
            venue_id: venue.to_string(),
            publication_year: year,
            cited_by_count: Some(0),
            fwci,
            citation_normalized_percentile: percentile,
            is_in_top_10_percent: top.0,
            is_in_top_1_percent: top.1,
            oa_status: oa,
        }
    }

    fn folded(rows: &[ArticleRecord]) -> RecordAccumulator {
        let refs: Vec<&ArticleRecord> = rows.iter().collect();
        let mut acc = RecordAccumulator::default();
        acc.add(&refs);
        acc
    }

    #[test]
    fn venue_year_scenario() {
        let rows = vec![
            article("a", "V1", 2020, Some(2.0), Some(95.0), (true, false), Some(OaStatus::Gold)),
            article("b", "V1", 2020, None, Some(40.0), (false, false), Some(OaStatus::Closed)),
        ];
        let m = folded(&rows).finalize();
        assert_eq!(m.num_documents, 2);
        assert_relative_eq!(m.fwci_avg, 1.0);
        assert_relative_eq!(m.avg_percentile, 67.5);
        assert_relative_eq!(m.pct_top_10, 50.0);
        assert_relative_eq!(m.pct_top_1, 0.0);
        assert_relative_eq!(m.pct_oa[OaStatus::Gold.index()], 50.0);
        assert_relative_eq!(m.pct_oa[OaStatus::Closed.index()], 50.0);
        assert_relative_eq!(m.pct_oa[OaStatus::Green.index()], 0.0);
    }

    #[test]
    fn three_articles_one_venue_year() {
        let rows = vec![
            article("a", "V1", 2020, Some(0.5), Some(10.0), (false, false), Some(OaStatus::Closed)),
            article("b", "V1", 2020, Some(1.5), Some(90.0), (true, false), Some(OaStatus::Gold)),
            article("c", "V1", 2020, Some(2.0), Some(99.0), (true, true), Some(OaStatus::Gold)),
        ];
        let m = folded(&rows).finalize();
        assert_eq!(m.num_documents, 3);
        assert_relative_eq!(m.fwci_avg, 4.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(m.pct_top_10, 200.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(m.pct_top_1, 100.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(m.avg_percentile, 199.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(m.pct_oa[OaStatus::Gold.index()], 200.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(m.pct_oa[OaStatus::Closed.index()], 100.0 / 3.0, epsilon = 1e-6);
        for s in [OaStatus::Diamond, OaStatus::Green, OaStatus::Hybrid, OaStatus::Bronze] {
            assert_eq!(m.pct_oa[s.index()], 0.0);
        }
    }

    #[test]
    fn no_documents_no_values() {
        let acc = RecordAccumulator::default();
        assert_eq!(acc.finalize(), DocMetrics::default());
        assert_eq!(acc.finalize(), acc.finalize());
        let yearly = YearlyAccumulator::default();
        assert_eq!(yearly.span(2000, 2020).count(), 0);
        assert_eq!(yearly.year_range(), None);
    }

    #[test]
    fn unknown_oa_only_in_denominator() {
        let rows = vec![
            article("a", "V", 2020, Some(1.0), None, (false, false), None),
            article("b", "V", 2020, Some(1.0), None, (false, false), Some(OaStatus::Green)),
        ];
        let m = folded(&rows).finalize();
        assert_relative_eq!(m.pct_oa.iter().sum::<f64>(), 50.0);
    }

    #[test]
    fn oa_shares_never_exceed_whole() {
        let rows: Vec<ArticleRecord> = OaStatus::ALL
            .iter()
            .enumerate()
            .map(|(i, s)| article(&format!("w{}", i), "V", 2020, None, None, (false, false), Some(*s)))
            .collect();
        let m = folded(&rows).finalize();
        assert!(m.pct_oa.iter().sum::<f64>() <= 100.0);
        for v in m.pct_oa {
            assert_relative_eq!(v, 100.0 / 6.0, epsilon = 1e-6);
        }
        let mut rng = StdRng::seed_from_u64(5);
        for n in 1..60 {
            let m = folded(&random_rows(&mut rng, n)).finalize();
            assert!(m.pct_oa.iter().sum::<f64>() <= 100.0);
        }
    }

    fn random_rows(rng: &mut StdRng, n: usize) -> Vec<ArticleRecord> {
        (0..n)
            .map(|i| {
                let fwci = if rng.gen_bool(0.8) { Some(rng.gen_range(0.0..5.0)) } else { None };
                let pct = if rng.gen_bool(0.9) { Some(rng.gen_range(0.0..100.0)) } else { None };
                let oa = if rng.gen_bool(0.9) {
                    Some(OaStatus::ALL[rng.gen_range(0..6)])
                } else {
                    None
                };
                article(
                    &format!("w{}", i),
                    "V",
                    rng.gen_range(2015..2025),
                    fwci,
                    pct,
                    (rng.gen_bool(0.1), rng.gen_bool(0.01)),
                    oa,
                )
            })
            .collect()
    }

    #[test]
    fn merge_of_partitions_matches_whole() {
        let mut rng = StdRng::seed_from_u64(11);
        let rows = random_rows(&mut rng, 500);
        let whole = folded(&rows).finalize();
        for _ in 0..10 {
            let cut_a = rng.gen_range(0..rows.len());
            let cut_b = rng.gen_range(cut_a..=rows.len());
            let mut acc = folded(&rows[..cut_a]);
            acc.merge(&folded(&rows[cut_b..]));
            acc.merge(&folded(&rows[cut_a..cut_b]));
            let parted = acc.finalize();
            assert_eq!(parted.num_documents, whole.num_documents);
            assert_relative_eq!(parted.fwci_avg, whole.fwci_avg, epsilon = 1e-6);
            assert_relative_eq!(parted.avg_percentile, whole.avg_percentile, epsilon = 1e-6);
            assert_eq!(parted.pct_top_10, whole.pct_top_10);
            assert_eq!(parted.pct_oa, whole.pct_oa);
        }
    }

    #[test]
    fn yearly_span_merges_years() {
        let mut rng = StdRng::seed_from_u64(3);
        let rows = random_rows(&mut rng, 300);
        let refs: Vec<&ArticleRecord> = rows.iter().collect();
        let mut yearly = YearlyAccumulator::default();
        yearly.add(&refs);
        let (lo, hi) = yearly.year_range().unwrap();
        assert!(lo >= 2015 && hi <= 2024);
        let in_range: Vec<ArticleRecord> = rows
            .iter()
            .filter(|r| (2017..=2020).contains(&r.publication_year))
            .cloned()
            .collect();
        assert_eq!(yearly.span(2017, 2020).finalize().num_documents, in_range.len() as u64);
        assert_eq!(
            yearly.span(2017, 2020).finalize().pct_top_10,
            folded(&in_range).finalize().pct_top_10
        );
        assert_eq!(yearly.span(2021, 2017).count(), 0);
    }
}

// Market data feed
//
// The engine consumes an ordered stream of bars plus auxiliary series
// aligned to the same timestamps. This module loads that stream from CSV
// for replay sessions and fills in Wilder ATR when the file does not carry
// an ATR column. Live connectivity is a collaborator behind the same
// MarketSlice shape, out of scope here.

use std::fs;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::{self, Stream};

use crate::error::{EngineError, EngineResult};
use crate::types::{Bar, MarketSlice};

/// Loaded, aligned bar series for one symbol.
#[derive(Debug, Clone)]
pub struct BarFeed {
    slices: Vec<MarketSlice>,
}

impl BarFeed {
    /// Load bars from a CSV file with header
    /// `timestamp,open,high,low,close,volume[,funding_rate,vol_percentile]`.
    /// Timestamps are unix seconds or RFC 3339. Malformed rows fail the
    /// load; a feed with silent holes is worse than no feed.
    pub fn from_csv<P: AsRef<Path>>(path: P, atr_period: usize) -> EngineResult<Self> {
        let content = fs::read_to_string(&path).map_err(|e| {
            EngineError::Feed(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_csv_str(&content, atr_period)
    }

    pub fn from_csv_str(content: &str, atr_period: usize) -> EngineResult<Self> {
        let mut lines = content.lines().enumerate();

        let header = loop {
            match lines.next() {
                Some((_, line)) if line.trim().is_empty() => continue,
                Some((_, line)) => break line,
                None => return Err(EngineError::Feed("empty feed file".to_string())),
            }
        };
        let columns: Vec<&str> = header.split(',').map(|c| c.trim()).collect();
        let index_of = |name: &str| columns.iter().position(|c| *c == name);

        for required in ["timestamp", "open", "high", "low", "close", "volume"] {
            if index_of(required).is_none() {
                return Err(EngineError::Feed(format!(
                    "missing required column '{}'",
                    required
                )));
            }
        }
        let ts_col = index_of("timestamp").unwrap();
        let open_col = index_of("open").unwrap();
        let high_col = index_of("high").unwrap();
        let low_col = index_of("low").unwrap();
        let close_col = index_of("close").unwrap();
        let volume_col = index_of("volume").unwrap();
        let funding_col = index_of("funding_rate");
        let vol_pct_col = index_of("vol_percentile");

        let mut bars = Vec::new();
        let mut funding = Vec::new();
        let mut vol_pct = Vec::new();

        for (line_no, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();

            bars.push(Bar {
                timestamp: parse_timestamp(required_field(&fields, ts_col, line_no + 1)?, line_no + 1)?,
                open: number_field(&fields, open_col, line_no + 1)?,
                high: number_field(&fields, high_col, line_no + 1)?,
                low: number_field(&fields, low_col, line_no + 1)?,
                close: number_field(&fields, close_col, line_no + 1)?,
                volume: number_field(&fields, volume_col, line_no + 1)?,
            });
            funding.push(optional_field(&fields, funding_col, line_no + 1)?);
            vol_pct.push(optional_field(&fields, vol_pct_col, line_no + 1)?);
        }

        if bars.is_empty() {
            return Err(EngineError::Feed("feed contains no bars".to_string()));
        }
        for pair in bars.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(EngineError::Feed(format!(
                    "bars out of order at {}",
                    pair[1].timestamp
                )));
            }
        }

        let atr = wilder_atr(&bars, atr_period);
        let slices = bars
            .into_iter()
            .zip(atr)
            .zip(funding.into_iter().zip(vol_pct))
            .map(|((bar, atr), (funding_rate, vol_percentile))| MarketSlice {
                bar,
                atr,
                funding_rate,
                vol_percentile,
            })
            .collect();

        Ok(Self { slices })
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn slices(&self) -> &[MarketSlice] {
        &self.slices
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarketSlice> {
        self.slices.iter()
    }

    /// Adapt the feed to the async session loop.
    pub fn into_stream(self) -> impl Stream<Item = MarketSlice> + Unpin {
        stream::iter(self.slices)
    }
}

fn required_field<'a>(fields: &[&'a str], col: usize, line_no: usize) -> EngineResult<&'a str> {
    fields
        .get(col)
        .copied()
        .ok_or_else(|| EngineError::Feed(format!("line {}: missing column {}", line_no, col)))
}

fn number_field(fields: &[&str], col: usize, line_no: usize) -> EngineResult<f64> {
    let raw = required_field(fields, col, line_no)?;
    raw.parse::<f64>()
        .map_err(|_| EngineError::Feed(format!("line {}: bad number '{}'", line_no, raw)))
}

fn optional_field(
    fields: &[&str],
    col: Option<usize>,
    line_no: usize,
) -> EngineResult<Option<f64>> {
    match col {
        None => Ok(None),
        Some(col) => match fields.get(col).copied().unwrap_or("") {
            "" => Ok(None),
            raw => raw
                .parse::<f64>()
                .map(Some)
                .map_err(|_| EngineError::Feed(format!("line {}: bad number '{}'", line_no, raw))),
        },
    }
}

fn parse_timestamp(raw: &str, line_no: usize) -> EngineResult<DateTime<Utc>> {
    if let Ok(secs) = raw.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| EngineError::Feed(format!("line {}: bad unix time {}", line_no, secs)));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| EngineError::Feed(format!("line {}: bad timestamp '{}'", line_no, raw)))
}

/// Wilder-smoothed ATR. The first `period` bars use the running mean of the
/// true range so the series has no warmup holes.
fn wilder_atr(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    let mut atr = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        let tr = if i == 0 {
            bar.high - bar.low
        } else {
            let prev_close = bars[i - 1].close;
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        };

        atr = if i < period {
            (atr * i as f64 + tr) / (i + 1) as f64
        } else {
            (atr * (period as f64 - 1.0) + tr) / period as f64
        };
        out.push(atr);
    }

    out
}

//! Per-URL, per-method request counters and timings.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    routing::get,
    Json, Router,
};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    pub url: String,
    pub times: u64,
    pub min: Duration,
    pub max: Duration,
    pub total: Duration,
    pub codes: BTreeMap<u16, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeCount {
    pub code: u16,
    pub count: u64,
}

impl Statistics {
    fn new(url: &str, status: u16, elapsed: Duration) -> Self {
        Self {
            url: url.to_string(),
            times: 1,
            min: elapsed,
            max: elapsed,
            total: elapsed,
            codes: BTreeMap::from([(status, 1)]),
        }
    }

    fn add(&mut self, status: u16, elapsed: Duration) {
        self.times += 1;
        self.max = self.max.max(elapsed);
        self.min = self.min.min(elapsed);
        self.total += elapsed;
        *self.codes.entry(status).or_default() += 1;
    }

    pub fn average(&self) -> Duration {
        let nanos = self.total.as_nanos() / u128::from(self.times.max(1));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Status counts in ascending status order.
    pub fn codes_count(&self) -> Vec<CodeCount> {
        self.codes
            .iter()
            .map(|(&code, &count)| CodeCount { code, count })
            .collect()
    }

    /// `200:3, 404:1`
    pub fn codes_string(&self) -> String {
        self.codes
            .iter()
            .map(|(code, count)| format!("{}:{}", code, count))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn micros(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1000.0
}

/// One row of the JSON report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlInfo {
    pub url: String,
    pub method: String,
    pub times: u64,
    pub total_used: f64,
    pub max_used: f64,
    pub min_used: f64,
    pub avg_used: f64,
    pub codes: Vec<CodeCount>,
}

#[derive(Debug, Default)]
pub struct UrlStatistics {
    length_limit: usize,
    // url -> method -> stats
    urls: RwLock<HashMap<String, HashMap<String, Statistics>>>,
}

impl UrlStatistics {
    /// `length_limit` caps how many distinct URLs are tracked; 0 means no
    /// limit. Requests for new URLs past the cap are not counted.
    pub fn new(length_limit: usize) -> Self {
        Self {
            length_limit,
            urls: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, method: &str, path: &str, status: u16, elapsed: Duration) {
        let status = if status == 0 { 200 } else { status };
        let mut urls = self.urls.write();

        if let Some(methods) = urls.get_mut(path) {
            match methods.get_mut(method) {
                Some(stats) => stats.add(status, elapsed),
                None => {
                    methods.insert(method.to_string(), Statistics::new(path, status, elapsed));
                }
            }
            return;
        }

        if self.length_limit > 0 && urls.len() >= self.length_limit {
            return;
        }
        urls.insert(
            path.to_string(),
            HashMap::from([(method.to_string(), Statistics::new(path, status, elapsed))]),
        );
    }

    pub fn get(&self, path: &str, method: &str) -> Option<Statistics> {
        self.urls.read().get(path)?.get(method).cloned()
    }

    pub fn len(&self) -> usize {
        self.urls.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.read().is_empty()
    }

    /// Every (url, method) pair, sorted by url then method.
    pub fn infos(&self) -> Vec<UrlInfo> {
        let urls = self.urls.read();
        let mut infos: Vec<UrlInfo> = urls
            .iter()
            .flat_map(|(url, methods)| {
                methods.iter().map(move |(method, stats)| UrlInfo {
                    url: url.clone(),
                    method: method.clone(),
                    times: stats.times,
                    total_used: stats.total.as_secs_f64(),
                    max_used: micros(stats.max),
                    min_used: micros(stats.min),
                    avg_used: micros(stats.average()),
                    codes: stats.codes_count(),
                })
            })
            .collect();
        infos.sort_by(|a, b| a.url.cmp(&b.url).then_with(|| a.method.cmp(&b.method)));
        infos
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.infos())
    }

    pub fn write_table<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        let sep = format!(
            "+{}+{}+{}+{}+{}+{}+{}+{}+\n",
            "-".repeat(51),
            "-".repeat(12),
            "-".repeat(18),
            "-".repeat(18),
            "-".repeat(18),
            "-".repeat(18),
            "-".repeat(18),
            "-".repeat(18)
        );

        w.write_all(sep.as_bytes())?;
        writeln!(
            w,
            "| {:<50}| {:<10} | {:<16} | {:<16} | {:<16} | {:<16} | {:<16} | {:<16} |",
            "Request URL",
            "Method",
            "Times",
            "Status Times",
            "Total Used(s)",
            "Max Used(μs)",
            "Min Used(μs)",
            "Avg Used(μs)"
        )?;
        w.write_all(sep.as_bytes())?;

        for info in self.infos() {
            let codes = info
                .codes
                .iter()
                .map(|c| format!("{}:{}", c.code, c.count))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                w,
                "| {:<50}| {:<10} | {:>16} | {:<16} | {:>16.6} | {:>16.6} | {:>16.6} | {:>16.6} |",
                info.url,
                info.method,
                info.times,
                codes,
                info.total_used,
                info.max_used,
                info.min_used,
                info.avg_used
            )?;
        }
        w.write_all(sep.as_bytes())
    }

    pub fn table(&self) -> String {
        let mut out = Vec::new();
        // writing into a Vec cannot fail
        let _ = self.write_table(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// Time every request and record it under its path and method.
pub async fn statistics_middleware(
    State(stats): State<Arc<UrlStatistics>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    stats.record(&method, &path, response.status().as_u16(), started.elapsed());
    response
}

async fn table_handler(State(stats): State<Arc<UrlStatistics>>) -> String {
    stats.table()
}

async fn json_handler(State(stats): State<Arc<UrlStatistics>>) -> Json<Vec<UrlInfo>> {
    Json(stats.infos())
}

/// `GET {prefix}` serves the text table, `GET {prefix}.json` the JSON report.
pub fn routes(prefix: &str, stats: Arc<UrlStatistics>) -> Router {
    Router::new()
        .route(prefix, get(table_handler))
        .route(&format!("{}.json", prefix), get(json_handler))
        .with_state(stats)
}

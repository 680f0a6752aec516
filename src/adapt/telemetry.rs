use super::HistoryEntry;

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// An append-only series of `x y` pairs backed by a text file
#[derive(Debug)]
pub struct ConvergenceGraph {
    path: PathBuf,
    points: Vec<(f64, f64)>,
}

impl ConvergenceGraph {
    /// Start a new graph, truncating any existing file at `path`
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        File::create(path.as_ref())?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            points: Vec::new(),
        })
    }

    pub fn add_values(&mut self, x: f64, y: f64) -> std::io::Result<()> {
        let f = OpenOptions::new().append(true).open(&self.path)?;
        let mut w = BufWriter::new(&f);
        writeln!(w, "{} {}", x, y)?;
        w.flush()?;

        self.points.push((x, y));
        Ok(())
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The four convergence graphs of an adaptive run: estimated and exact error against DOFs and against time
#[derive(Debug)]
pub struct ConvergenceGraphs {
    dof_est: ConvergenceGraph,
    cpu_est: ConvergenceGraph,
    exact: Option<[ConvergenceGraph; 2]>,
}

impl ConvergenceGraphs {
    pub fn create(dir: impl AsRef<Path>, with_exact: bool) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let graph = |name: &str| ConvergenceGraph::create(dir.as_ref().join(name));

        Ok(Self {
            dof_est: graph("conv_dof_est.dat")?,
            cpu_est: graph("conv_cpu_est.dat")?,
            exact: if with_exact {
                Some([graph("conv_dof_exact.dat")?, graph("conv_cpu_exact.dat")?])
            } else {
                None
            },
        })
    }

    pub fn record(&mut self, entry: &HistoryEntry) -> std::io::Result<()> {
        self.dof_est.add_values(entry.dof_coarse as f64, entry.err_est_percent)?;
        self.cpu_est.add_values(entry.elapsed_cpu, entry.err_est_percent)?;

        if let (Some([dof_exact, cpu_exact]), Some(err_exact)) = (&mut self.exact, entry.err_exact_percent) {
            dof_exact.add_values(entry.dof_coarse as f64, err_exact)?;
            cpu_exact.add_values(entry.elapsed_cpu, err_exact)?;
        }
        Ok(())
    }
}

/// Accumulates the time spent between ticks, leaving out periods which are skipped
#[derive(Clone, Debug)]
pub struct TimePeriod {
    accumulated: Duration,
    last: Instant,
}

impl Default for TimePeriod {
    fn default() -> Self {
        Self::new()
    }
}

impl TimePeriod {
    pub fn new() -> Self {
        Self {
            accumulated: Duration::ZERO,
            last: Instant::now(),
        }
    }

    /// Add the time since the last tick (or skip) to the total
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        self.accumulated += now - self.last;
        self.last = now;
        self.accumulated
    }

    /// Discard the time since the last tick (or skip)
    pub fn skip(&mut self) {
        self.last = Instant::now();
    }

    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn skipped_periods_are_not_counted() {
        let mut timer = TimePeriod::new();
        sleep(Duration::from_millis(20));
        let first = timer.tick();
        assert!(first >= Duration::from_millis(20));

        sleep(Duration::from_millis(50));
        timer.skip();
        let second = timer.tick();
        assert!(second - first < Duration::from_millis(50));
    }

    #[test]
    fn graphs_are_recreated_and_appended() {
        let dir = std::env::temp_dir().join("hp_adapt_telemetry_test");
        for _ in 0..2 {
            let mut graphs = ConvergenceGraphs::create(&dir, true).unwrap();
            for (i, err) in [10.0, 1.0].iter().enumerate() {
                graphs
                    .record(&HistoryEntry {
                        iteration: i + 1,
                        dof_coarse: 100 * (i + 1),
                        dof_fine: 400 * (i + 1),
                        err_est_percent: *err,
                        err_exact_percent: Some(err * 1.5),
                        elapsed_cpu: 0.5 * i as f64,
                    })
                    .unwrap();
            }
        }

        let dof_est = std::fs::read_to_string(dir.join("conv_dof_est.dat")).unwrap();
        assert_eq!(dof_est, "100 10\n200 1\n");
        let cpu_exact = std::fs::read_to_string(dir.join("conv_cpu_exact.dat")).unwrap();
        assert_eq!(cpu_exact, "0 15\n0.5 1.5\n");
    }
}

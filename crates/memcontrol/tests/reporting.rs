#[cfg(test)]
pub mod tests {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use memcontrol::output::{self, Scope, WindowRecord};
    use memcontrol::stats::{MemStats, StatsRegister};
    use memcontrol::{Communicator, Format, LocalGroup, ReportMode, StatsSource, WindowReporter};

    /// Writer shared by every rank of a group, like a terminal all ranks print to.
    #[derive(Clone, Default)]
    struct SharedOutput(Arc<Mutex<Vec<u8>>>);

    impl SharedOutput {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Runs one reporting round on `procs` thread ranks. Rank `r` first applies
    /// `fill(r, register)` to its own counters. Returns every rank's counters
    /// after the round.
    fn run_round(
        procs: usize,
        mode: ReportMode,
        format: Format,
        out: &SharedOutput,
        fill: impl Fn(usize, &mut StatsRegister) + Sync,
    ) -> Vec<MemStats> {
        let fill = &fill;
        thread::scope(|s| {
            let handles: Vec<_> = LocalGroup::new(procs)
                .into_iter()
                .map(|comm| {
                    let mut out = out.clone();
                    s.spawn(move || {
                        let mut register = StatsRegister::new();
                        fill(comm.rank(), &mut register);
                        let source = Mutex::new(register);

                        WindowReporter::new(&comm, "allreduce")
                            .mode(mode)
                            .format(format)
                            .report_window(&source, &mut out)
                            .unwrap();
                        source.snapshot()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    fn cells(line: &str) -> Vec<&str> {
        line.split_whitespace().collect()
    }

    #[test]
    fn test_aggregate_prints_truncated_average_once() {
        let out = SharedOutput::default();
        run_round(3, ReportMode::Aggregate, Format::Table, &out, |rank, r| {
            // 7 bytes in total over 3 ranks
            if rank == 0 {
                r.count_malloc(7);
            }
            r.count_free(0);
        });

        let lines = out.lines();
        assert_eq!(lines.len(), 1, "Expected one line\n\nGot:\n{lines:?}");
        assert_eq!(
            cells(&lines[0]),
            ["3", "avg", "0", "0", "1", "0", "0", "2", "0"]
        );
    }

    #[test]
    fn test_detailed_orders_ranks_after_the_rule() {
        let out = SharedOutput::default();
        let procs = 4;
        run_round(procs, ReportMode::Detailed, Format::Table, &out, |rank, r| {
            for _ in 0..=rank {
                r.count_malloc(16);
            }
        });

        let lines = out.lines();
        assert_eq!(lines.len(), procs + 2, "Got:\n{}", lines.join("\n"));
        assert_eq!(cells(&lines[0])[1], "avg");
        // (1 + 2 + 3 + 4) / 4
        assert_eq!(cells(&lines[0])[2], "2");
        assert_eq!(lines[1], output::rule_for(&lines[0]));

        for (rank, line) in lines[2..].iter().enumerate() {
            let expected_rank = rank.to_string();
            let expected_calls = (rank + 1).to_string();
            let row = cells(line);
            assert_eq!(row[1], expected_rank, "Expected rank order\n\nGot:\n{line}");
            assert_eq!(row[2], expected_calls);
        }
    }

    #[test]
    fn test_local_mode_every_rank_prints_its_own_line() {
        let out = SharedOutput::default();
        run_round(3, ReportMode::Local, Format::Table, &out, |rank, r| {
            r.count_malloc(rank * 10)
        });

        let mut ranks: Vec<String> = out
            .lines()
            .iter()
            .map(|line| cells(line)[1].to_string())
            .collect();
        ranks.sort();
        assert_eq!(ranks, ["0", "1", "2"]);
        assert!(out.lines().iter().all(|line| !line.contains("avg")));
    }

    #[test]
    fn test_every_mode_resets_every_rank() {
        for mode in [ReportMode::Local, ReportMode::Aggregate, ReportMode::Detailed] {
            let out = SharedOutput::default();
            let after = run_round(2, mode, Format::Table, &out, |_, r| {
                r.count_malloc(32);
                r.count_unknown_realloc();
            });
            assert!(
                after.iter().all(MemStats::is_zero),
                "{mode} left counters behind: {after:?}"
            );
        }
    }

    #[test]
    fn test_json_sum_is_exact_where_average_truncates() {
        let out = SharedOutput::default();
        run_round(2, ReportMode::Detailed, Format::Json, &out, |rank, r| {
            if rank == 1 {
                r.count_malloc(5);
            }
        });

        let records: Vec<WindowRecord> = out
            .lines()
            .iter()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        let average = records.iter().find(|r| r.scope == Scope::Average).unwrap();
        let sum = records.iter().find(|r| r.scope == Scope::Sum).unwrap();
        assert_eq!(average.stats.bytes_allocated, 2);
        assert_eq!(average.stats.malloc_calls, 0);
        assert_eq!(sum.stats.bytes_allocated, 5);
        assert_eq!(sum.stats.malloc_calls, 1);

        let locals: Vec<Option<usize>> = records
            .iter()
            .filter(|r| r.scope == Scope::Local)
            .map(|r| r.rank)
            .collect();
        assert_eq!(locals, [Some(0), Some(1)]);
        assert!(records.iter().all(|r| r.procs == 2));
    }

    #[test]
    fn test_header_only_on_root() {
        let out = SharedOutput::default();
        thread::scope(|s| {
            for comm in LocalGroup::new(3) {
                let mut out = out.clone();
                s.spawn(move || {
                    WindowReporter::new(&comm, "gather")
                        .print_header(&mut out)
                        .unwrap();
                });
            }
        });

        let lines = out.lines();
        assert_eq!(lines, output::header_lines("gather"));
    }
}

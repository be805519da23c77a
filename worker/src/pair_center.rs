//! In-memory store of all job pairs of a task.
//!
//! The input records are loaded once and never mutated. Whatever workers find
//! out about a job is recorded per job id behind a lock, counters are atomics.
//! Build pairs, job pairs and jobs are addressed by index into the input.

use crate::transpiler::github::steps;
use crate::transpiler::Job;
use bugswarm_analyzer::{AnalyzedLog, Mismatch};
use bugswarm_common::errors::*;
use bugswarm_common::model::{self, BuildPairRecord, JobPairRecord, MatchHistory, Side};
use bugswarm_common::{CiService, Classification};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Something a worker can be handed: a single job, or a whole job pair in package mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub buildpair: usize,
    pub jobpair: usize,
    pub side: Option<Side>,
}

/// Result of reproducing one job once.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub matched: bool,
    pub reproduced: AnalyzedLog,
    pub original: AnalyzedLog,
    pub mismatches: Vec<Mismatch>,
}

#[derive(Debug, Default)]
struct JobState {
    reproduced: bool,
    outcome: Option<JobOutcome>,
}

#[derive(Debug, Default)]
struct PairState {
    skip: bool,
    reproduced: bool,
    r#match: u8,
    match_history: MatchHistory,
    failed_history: MatchHistory,
    passed_history: MatchHistory,
}

#[derive(Debug, Default)]
struct BuildPairState {
    done: bool,
    match_set: bool,
    r#match: u8,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<u64, JobState>,
    pairs: HashMap<(usize, usize), PairState>,
    buildpairs: HashMap<usize, BuildPairState>,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub newly_reproduced: AtomicUsize,
    pub already_reproduced: AtomicUsize,
    pub reproduce_err: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct PairCenter {
    pub buildpairs: Vec<BuildPairRecord>,
    pub counters: Counters,
    state: Mutex<State>,
}

/// `<repo>/<pr>-<failed build>-<passed build>`
pub fn buildpair_name(bp: &BuildPairRecord) -> String {
    format!("{}/{}-{}-{}", bp.repo, bp.pr_num, bp.failed_build.build_id, bp.passed_build.build_id)
}

/// `<failed job>-<passed job>`
pub fn jobpair_name(jp: &JobPairRecord) -> String {
    format!("{}-{}", jp.failed_job.job_id, jp.passed_job.job_id)
}

/// Match type of a job pair in one run.
///
/// 1: both jobs match their original logs. 2: failed job failed and passed
/// job passed. 3: failed job has failing tests and passed job has none.
pub fn jobpair_match_type(failed: Option<&JobOutcome>, passed: Option<&JobOutcome>) -> u8 {
    let (failed, passed) = match (failed, passed) {
        (Some(f), Some(p)) => (f, p),
        _ => return 0,
    };
    if failed.matched && passed.matched {
        1
    } else if failed.reproduced.status() != "ok" && passed.reproduced.status() == "ok" {
        2
    } else if has_failed_tests(&failed.reproduced) && has_no_failed_tests(&passed.reproduced) {
        3
    } else {
        0
    }
}

/// Same as [`jobpair_match_type`] over every job of both builds.
pub fn buildpair_match_type(failed: &[Option<&JobOutcome>], passed: &[Option<&JobOutcome>]) -> u8 {
    let all = || failed.iter().chain(passed.iter());
    if all().all(|o| o.map(|o| o.matched).unwrap_or(false)) {
        return 1;
    }
    if all().any(Option::is_none) {
        return 0;
    }
    let failed = failed.iter().flatten().collect::<Vec<_>>();
    let passed = passed.iter().flatten().collect::<Vec<_>>();

    if failed.iter().any(|o| o.reproduced.status() != "ok") && passed.iter().all(|o| o.reproduced.status() == "ok") {
        2
    } else if failed.iter().any(|o| has_failed_tests(&o.reproduced)) && passed.iter().all(|o| has_no_failed_tests(&o.reproduced)) {
        3
    } else {
        0
    }
}

fn has_failed_tests(log: &AnalyzedLog) -> bool {
    log.num_tests_failed().map(|n| n > 0).unwrap_or(false)
}

fn has_no_failed_tests(log: &AnalyzedLog) -> bool {
    matches!((log.num_tests_run(), log.num_tests_failed()), (Some(run), Some(0)) if run > 0)
}

/// Pairs with at least 3 recorded runs that never matched or were unstable aren't retried.
pub fn should_skip(history: &MatchHistory) -> bool {
    if history.len() < 3 {
        return false;
    }
    let distinct = history.values().collect::<HashSet<_>>();
    distinct.len() > 1 || distinct.contains(&0)
}

/// Fill in the failed step of GitHub job pairs the filter didn't annotate.
fn fill_failed_step(bp: &mut BuildPairRecord) {
    if bp.ci_service != CiService::Github {
        return;
    }
    for jp in &mut bp.jobpairs {
        if jp.failed_step_kind.is_some() {
            continue;
        }
        let job = match bp.failed_build.job(jp.failed_job.job_id) {
            Ok(job) => job,
            Err(_) => continue,
        };
        if let Some(index) = job.failed_step_index {
            match steps::failed_step(index, &job.config, &job.steps) {
                Ok(step) => {
                    jp.failed_step_kind = Some(step.kind().to_string());
                    jp.failed_step_command = Some(step.command().to_string());
                },
                Err(err) => debug!("Could not resolve failed step of job {}: {:#}", job.job_id, err),
            }
        }
    }
}

impl PairCenter {
    pub fn load<P: AsRef<Path>>(path: P, skip_filtered: bool) -> Result<PairCenter> {
        info!("Initializing pair center");
        let buildpairs = model::read_buildpairs(path)?;
        PairCenter::new(buildpairs, skip_filtered)
    }

    pub fn new(input: Vec<BuildPairRecord>, skip_filtered: bool) -> Result<PairCenter> {
        let mut buildpairs = Vec::new();
        for mut bp in input {
            bp.validate()?;
            if skip_filtered {
                bp.jobpairs.retain(|jp| !jp.is_filtered);
                if bp.jobpairs.is_empty() {
                    debug!("Skipping {}, all job pairs are filtered", buildpair_name(&bp));
                    continue;
                }
            }
            fill_failed_step(&mut bp);
            buildpairs.push(bp);
        }

        let center = PairCenter {
            buildpairs,
            counters: Counters::default(),
            state: Mutex::new(State::default()),
        };
        center.init_state();
        debug!("Loaded {} build pairs, {} job pairs, {} jobs",
            center.buildpairs.len(), center.total_jobpairs(), center.total_jobs());
        Ok(center)
    }

    fn init_state(&self) {
        let mut state = self.lock();
        for (bi, bp) in self.buildpairs.iter().enumerate() {
            state.buildpairs.insert(bi, BuildPairState::default());
            for (ji, jp) in bp.jobpairs.iter().enumerate() {
                let history = jp.match_history.clone().unwrap_or_default();
                let skip = should_skip(&history);
                if skip {
                    info!("Skipping job pair {}, no match or unstable in {} runs", jobpair_name(jp), history.len());
                }
                state.pairs.insert((bi, ji), PairState {
                    skip,
                    match_history: history,
                    failed_history: jp.failed_job.match_history.clone().unwrap_or_default(),
                    passed_history: jp.passed_job.match_history.clone().unwrap_or_default(),
                    ..Default::default()
                });
                for side in Side::BOTH {
                    state.jobs.entry(jp.job(side).job_id).or_default();
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn total_jobpairs(&self) -> usize {
        self.buildpairs.iter().map(|bp| bp.jobpairs.len()).sum()
    }

    pub fn total_jobs(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn job(&self, item: &WorkItem, side: Side) -> Job<'_> {
        let bp = &self.buildpairs[item.buildpair];
        Job::new(bp, &bp.jobpairs[item.jobpair], side)
    }

    pub fn jobpair(&self, item: &WorkItem) -> (&BuildPairRecord, &JobPairRecord) {
        let bp = &self.buildpairs[item.buildpair];
        (bp, &bp.jobpairs[item.jobpair])
    }

    /// Everything that's left to do, in a stable order.
    pub fn items(&self, package_mode: bool) -> Vec<WorkItem> {
        let state = self.lock();
        let mut keyed = Vec::new();
        let mut seen = HashSet::new();

        for (bi, bp) in self.buildpairs.iter().enumerate() {
            for (ji, jp) in bp.jobpairs.iter().enumerate() {
                let pair = &state.pairs[&(bi, ji)];
                if package_mode {
                    if !pair.reproduced {
                        keyed.push(((bp.repo.clone(), bp.failed_build.build_id, jp.failed_job.job_id, Side::Failed), WorkItem {
                            buildpair: bi,
                            jobpair: ji,
                            side: None,
                        }));
                    }
                    continue;
                }
                if pair.skip {
                    continue;
                }
                for side in Side::BOTH {
                    let job_id = jp.job(side).job_id;
                    if state.jobs[&job_id].reproduced || !seen.insert(job_id) {
                        continue;
                    }
                    keyed.push(((bp.repo.clone(), bp.failed_build.build_id, jp.failed_job.job_id, side), WorkItem {
                        buildpair: bi,
                        jobpair: ji,
                        side: Some(side),
                    }));
                }
            }
        }

        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.into_iter().map(|(_, item)| item).collect()
    }

    /// Split the remaining work into `n` queues of about the same size.
    ///
    /// Both jobs of a pair land in the same queue so the failed job always runs first.
    pub fn partition(&self, n: usize, package_mode: bool) -> Vec<VecDeque<WorkItem>> {
        let n = n.max(1);
        let mut queues = vec![VecDeque::new(); n];
        let mut slot = HashMap::new();
        for item in self.items(package_mode) {
            let next = slot.len() % n;
            let idx = *slot.entry((item.buildpair, item.jobpair)).or_insert(next);
            queues[idx].push_back(item);
        }
        queues
    }

    /// Jobs (or job pairs in package mode) that still have to be processed.
    pub fn num_remaining(&self, package_mode: bool) -> usize {
        let state = self.lock();
        if package_mode {
            state.pairs.values().filter(|p| !p.reproduced).count()
        } else {
            let mut remaining = HashSet::new();
            for (bi, bp) in self.buildpairs.iter().enumerate() {
                for (ji, jp) in bp.jobpairs.iter().enumerate() {
                    if state.pairs[&(bi, ji)].skip {
                        continue;
                    }
                    for side in Side::BOTH {
                        let job_id = jp.job(side).job_id;
                        if !state.jobs[&job_id].reproduced {
                            remaining.insert(job_id);
                        }
                    }
                }
            }
            remaining.len()
        }
    }

    pub fn is_skipped(&self, item: &WorkItem) -> bool {
        self.lock().pairs.get(&(item.buildpair, item.jobpair))
            .map(|p| p.skip)
            .unwrap_or(true)
    }

    /// Record the outcome of a job, `None` if it couldn't be reproduced at all.
    pub fn record_job(&self, job_id: u64, outcome: Option<JobOutcome>) {
        let mut state = self.lock();
        let job = state.jobs.entry(job_id).or_default();
        job.reproduced = true;
        job.outcome = outcome;
    }

    pub fn is_reproduced(&self, job_id: u64) -> bool {
        self.lock().jobs.get(&job_id).map(|j| j.reproduced).unwrap_or(false)
    }

    pub fn outcome(&self, job_id: u64) -> Option<JobOutcome> {
        self.lock().jobs.get(&job_id).and_then(|j| j.outcome.clone())
    }

    pub fn set_pair_reproduced(&self, item: &WorkItem) {
        if let Some(pair) = self.lock().pairs.get_mut(&(item.buildpair, item.jobpair)) {
            pair.reproduced = true;
        }
    }

    /// Mark build pairs as done once none of their jobs are pending.
    pub fn update_buildpair_done_status(&self) {
        let mut state = self.lock();
        for (bi, bp) in self.buildpairs.iter().enumerate() {
            let done = bp.jobpairs.iter().enumerate().all(|(ji, jp)| {
                state.pairs[&(bi, ji)].skip || Side::BOTH.iter().all(|side| {
                    state.jobs[&jp.job(*side).job_id].reproduced
                })
            });
            if done {
                if let Some(bp_state) = state.buildpairs.get_mut(&bi) {
                    bp_state.done = true;
                }
            }
        }
    }

    /// Match types of every finished build pair and its job pairs.
    pub fn assign_pair_match_types(&self) {
        let mut state = self.lock();
        for (bi, bp) in self.buildpairs.iter().enumerate() {
            let bp_state = &state.buildpairs[&bi];
            if !bp_state.done || bp_state.match_set {
                continue;
            }

            let outcomes = |build: &model::BuildRecord| build.jobs.iter()
                .map(|j| state.jobs.get(&j.job_id).and_then(|s| s.outcome.as_ref()))
                .collect::<Vec<_>>();
            let bp_match = buildpair_match_type(&outcomes(&bp.failed_build), &outcomes(&bp.passed_build));

            let jp_matches = bp.jobpairs.iter()
                .map(|jp| {
                    let outcome = |side: Side| state.jobs.get(&jp.job(side).job_id).and_then(|s| s.outcome.as_ref());
                    jobpair_match_type(outcome(Side::Failed), outcome(Side::Passed))
                })
                .collect::<Vec<_>>();

            for (ji, m) in jp_matches.into_iter().enumerate() {
                if let Some(pair) = state.pairs.get_mut(&(bi, ji)) {
                    pair.r#match = m;
                }
            }
            if let Some(bp_state) = state.buildpairs.get_mut(&bi) {
                bp_state.r#match = bp_match;
                bp_state.match_set = true;
            }
        }
    }

    /// Append the current match types as run `run` to the histories of finished pairs.
    pub fn assign_pair_match_history(&self, run: u32) {
        let mut state = self.lock();
        for (bi, bp) in self.buildpairs.iter().enumerate() {
            if !state.buildpairs[&bi].done {
                continue;
            }
            for (ji, jp) in bp.jobpairs.iter().enumerate() {
                let matched = |side: Side| state.jobs.get(&jp.job(side).job_id)
                    .and_then(|s| s.outcome.as_ref())
                    .map(|o| o.matched as u8)
                    .unwrap_or(0);
                let (failed, passed) = (matched(Side::Failed), matched(Side::Passed));
                if let Some(pair) = state.pairs.get_mut(&(bi, ji)) {
                    if pair.skip {
                        continue;
                    }
                    pair.match_history.insert(run, pair.r#match);
                    pair.failed_history.insert(run, failed);
                    pair.passed_history.insert(run, passed);
                }
            }
        }
    }

    pub fn match_history(&self, buildpair: usize, jobpair: usize) -> MatchHistory {
        self.lock().pairs.get(&(buildpair, jobpair))
            .map(|p| p.match_history.clone())
            .unwrap_or_default()
    }

    pub fn classification(&self, buildpair: usize, jobpair: usize) -> Classification {
        model::classify(&self.match_history(buildpair, jobpair))
    }

    /// Start over for the next run, the recorded histories are kept.
    pub fn reset_run(&self) {
        let mut state = self.lock();
        for job in state.jobs.values_mut() {
            *job = JobState::default();
        }
        for bp in state.buildpairs.values_mut() {
            *bp = BuildPairState::default();
        }
        for pair in state.pairs.values_mut() {
            pair.reproduced = false;
            pair.r#match = 0;
        }
    }

    /// The input with everything learned so far written back into it.
    pub fn annotated(&self) -> Vec<BuildPairRecord> {
        let state = self.lock();
        let mut out = self.buildpairs.clone();
        for (bi, bp) in out.iter_mut().enumerate() {
            if let Some(bp_state) = state.buildpairs.get(&bi) {
                if bp_state.match_set {
                    bp.r#match = Some(bp_state.r#match);
                }
            }
            for (ji, jp) in bp.jobpairs.iter_mut().enumerate() {
                let pair = &state.pairs[&(bi, ji)];
                jp.match_history = Some(pair.match_history.clone());
                jp.failed_job.match_history = Some(pair.failed_history.clone());
                jp.passed_job.match_history = Some(pair.passed_history.clone());

                for side in Side::BOTH {
                    let job = match side {
                        Side::Failed => &mut jp.failed_job,
                        Side::Passed => &mut jp.passed_job,
                    };
                    if let Some(outcome) = state.jobs.get(&job.job_id).and_then(|s| s.outcome.as_ref()) {
                        job.orig_result = Some(outcome.original.to_value());
                        job.mismatch_attrs = Some(outcome.mismatches.iter().map(|m| m.attr.clone()).collect());
                    }
                }
            }
        }
        out
    }

    /// Job pairs per classification, for the summary after a task.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut summary = BTreeMap::new();
        for (bi, bp) in self.buildpairs.iter().enumerate() {
            for ji in 0..bp.jobpairs.len() {
                *summary.entry(self.classification(bi, ji).to_string()).or_insert(0) += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub fn buildpair(repo: &str, failed_build: u64, jobs: &[(u64, u64)]) -> BuildPairRecord {
        let jobs_of = |ids: Vec<u64>| ids.into_iter()
            .map(|id| json!({"job_id": id, "language": "java", "config": {}}))
            .collect::<Vec<_>>();
        serde_json::from_value(json!({
            "repo": repo,
            "ci_service": "github",
            "failed_build": {"build_id": failed_build, "head_sha": "a", "jobs": jobs_of(jobs.iter().map(|j| j.0).collect())},
            "passed_build": {"build_id": failed_build + 1, "head_sha": "b", "jobs": jobs_of(jobs.iter().map(|j| j.1).collect())},
            "jobpairs": jobs.iter().map(|(f, p)| json!({
                "failed_job": {"job_id": f},
                "passed_job": {"job_id": p},
                "build_system": "maven",
            })).collect::<Vec<_>>(),
        })).unwrap()
    }

    fn outcome(matched: bool, status: &str, run: i64, failed: i64) -> JobOutcome {
        let log = AnalyzedLog::from(json!({
            "tr_log_status": status,
            "tr_log_num_tests_run": run,
            "tr_log_num_tests_failed": failed,
        }).as_object().unwrap().clone());
        JobOutcome {
            matched,
            reproduced: log.clone(),
            original: log,
            mismatches: Vec::new(),
        }
    }

    #[test]
    fn names() {
        let bp = buildpair("alibaba/nacos", 100, &[(1, 2)]);
        assert_eq!(buildpair_name(&bp), "alibaba/nacos/-1-100-101");
        assert_eq!(jobpair_name(&bp.jobpairs[0]), "1-2");
    }

    #[test]
    fn filtered_pairs_are_dropped() {
        let mut bp = buildpair("a/b", 100, &[(1, 2), (3, 4)]);
        bp.jobpairs[0].is_filtered = true;
        let center = PairCenter::new(vec![bp.clone()], true).unwrap();
        assert_eq!(center.total_jobpairs(), 1);
        assert_eq!(center.total_jobs(), 2);

        bp.jobpairs[1].is_filtered = true;
        let center = PairCenter::new(vec![bp], true).unwrap();
        assert!(center.buildpairs.is_empty());
    }

    #[test]
    fn invalid_pair_is_fatal() {
        let mut bp = buildpair("a/b", 100, &[(1, 2)]);
        bp.passed_build.build_id = 50;
        assert!(PairCenter::new(vec![bp], true).is_err());
    }

    #[test]
    fn partition_is_deterministic_and_balanced() {
        let pairs = vec![
            buildpair("z/z", 300, &[(31, 32)]),
            buildpair("a/a", 100, &[(11, 12), (13, 14)]),
            buildpair("m/m", 200, &[(21, 22)]),
        ];
        let center = PairCenter::new(pairs, true).unwrap();
        let queues = center.partition(2, false);
        assert_eq!(queues.len(), 2);
        assert_eq!(queues.iter().map(|q| q.len()).sum::<usize>(), 8);

        let ids = |q: &VecDeque<WorkItem>| q.iter()
            .map(|i| center.job(i, i.side.unwrap()).job_id())
            .collect::<Vec<_>>();
        assert_eq!(ids(&queues[0]), vec![11, 12, 21, 22]);
        assert_eq!(ids(&queues[1]), vec![13, 14, 31, 32]);

        let again = center.partition(2, false);
        assert_eq!(queues, again);
    }

    #[test]
    fn package_mode_counts_pairs() {
        let center = PairCenter::new(vec![buildpair("a/a", 100, &[(11, 12), (13, 14)])], true).unwrap();
        assert_eq!(center.num_remaining(true), 2);
        assert_eq!(center.num_remaining(false), 4);
        let items = center.items(true);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.side.is_none()));

        center.set_pair_reproduced(&items[0]);
        assert_eq!(center.num_remaining(true), 1);
    }

    #[test]
    fn skip_unstable_pairs() {
        let history = |v: &[u8]| v.iter().enumerate().map(|(i, m)| (i as u32 + 1, *m)).collect::<MatchHistory>();
        assert!(!should_skip(&history(&[0, 0])));
        assert!(should_skip(&history(&[0, 0, 0])));
        assert!(should_skip(&history(&[1, 0, 1])));
        assert!(!should_skip(&history(&[1, 1, 1])));
        assert!(!should_skip(&history(&[2, 2, 2])));

        let mut bp = buildpair("a/a", 100, &[(11, 12)]);
        bp.jobpairs[0].match_history = Some(history(&[1, 0, 1]));
        let center = PairCenter::new(vec![bp], true).unwrap();
        assert!(center.items(false).is_empty());
        assert_eq!(center.num_remaining(false), 0);
    }

    #[test]
    fn match_types() {
        let full = outcome(true, "broken", 10, 1);
        let passed = outcome(true, "ok", 10, 0);
        assert_eq!(jobpair_match_type(Some(&full), Some(&passed)), 1);

        let failed = outcome(false, "broken", 10, 2);
        assert_eq!(jobpair_match_type(Some(&failed), Some(&passed)), 2);

        let failed_ok = outcome(false, "ok", 10, 2);
        let passed_mismatch = outcome(false, "broken", 10, 0);
        assert_eq!(jobpair_match_type(Some(&failed_ok), Some(&passed_mismatch)), 3);

        assert_eq!(jobpair_match_type(Some(&failed), None), 0);
        assert_eq!(buildpair_match_type(&[Some(&full)], &[Some(&passed)]), 1);
        assert_eq!(buildpair_match_type(&[Some(&full)], &[None]), 0);
    }

    #[test]
    fn runs_build_up_history() {
        let center = PairCenter::new(vec![buildpair("a/a", 100, &[(11, 12)])], true).unwrap();
        for run in 1..=3 {
            center.update_buildpair_done_status();
            center.assign_pair_match_types();
            center.assign_pair_match_history(run);
            assert_eq!(center.match_history(0, 0).len(), run as usize - 1);

            center.record_job(11, Some(outcome(true, "broken", 5, 1)));
            center.record_job(12, Some(outcome(run != 2, "ok", 5, 0)));
            assert_eq!(center.num_remaining(false), 0);

            center.update_buildpair_done_status();
            center.assign_pair_match_types();
            center.assign_pair_match_history(run);
            center.reset_run();
        }

        let history = center.match_history(0, 0);
        assert_eq!(history, [(1, 1), (2, 2), (3, 1)].into_iter().collect());
        assert_eq!(center.classification(0, 0), Classification::Flaky);

        let annotated = center.annotated();
        let jp = &annotated[0].jobpairs[0];
        assert_eq!(jp.passed_job.match_history.as_ref().unwrap().get(&2), Some(&0));
        assert_eq!(annotated[0].r#match, None);
    }
}

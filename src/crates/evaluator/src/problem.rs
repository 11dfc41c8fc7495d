//! Problem context and registry.
//!
//! `spec_id` resolves to an immutable [`ProblemContext`]: the statement
//! summary, the constraints the tutor reasons from, the tutoring guide
//! (algorithms, hint roadmap, pitfalls), the reference solution, the test
//! cases, and the guardrail keyword list. Resolution is dynamic-source-first
//! (the durable store in production) with a static built-in fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Basic problem statement info.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicInfo {
    pub problem_id: String,
    pub title: String,
    pub description_summary: String,
    pub input_format: String,
    pub output_format: String,
}

/// Execution constraints and the reasoning they imply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub time_limit_sec: f64,
    pub memory_limit_mb: u32,
    pub variable_ranges: BTreeMap<String, String>,
    pub logic_reasoning: String,
}

/// Stepwise hint roadmap used by the writer and the holistic evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HintRoadmap {
    pub step_1_concept: String,
    pub step_2_state: String,
    pub step_3_transition: String,
    pub step_4_base_case: String,
}

/// Tutoring guide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiGuide {
    pub key_algorithms: Vec<String>,
    pub solution_architecture: String,
    pub hint_roadmap: Option<HintRoadmap>,
    pub common_pitfalls: Vec<String>,
}

/// One judge test case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestCase {
    pub input: String,
    pub expected: String,
    pub is_sample: bool,
}

/// Immutable per-spec problem record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemContext {
    pub basic_info: BasicInfo,
    pub constraints: Constraints,
    pub ai_guide: AiGuide,
    pub solution_code: String,
    pub test_cases: Vec<TestCase>,
    pub keywords: Vec<String>,
}

impl ProblemContext {
    /// Effective guardrail keyword set: the explicit keywords plus the
    /// algorithm names, normalised to lowercase and deduplicated.
    pub fn guardrail_keywords(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for keyword in self
            .keywords
            .iter()
            .chain(self.ai_guide.key_algorithms.iter())
        {
            let normalized = keyword.to_lowercase();
            if seen.insert(normalized.clone()) {
                out.push(normalized);
            }
        }
        out
    }

    /// Whether the record carries runnable test cases.
    pub fn has_test_cases(&self) -> bool {
        !self.test_cases.is_empty()
    }

    /// Minimal placeholder context for an unknown spec.
    pub fn unknown(spec_id: i64) -> Self {
        Self {
            basic_info: BasicInfo {
                problem_id: spec_id.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Dynamic problem source (the durable store in production).
#[async_trait]
pub trait ProblemSource: Send + Sync {
    /// Fetch the context of a spec, `None` when unknown.
    async fn fetch(&self, spec_id: i64) -> anyhow::Result<Option<ProblemContext>>;
}

/// Resolves `spec_id` to a [`ProblemContext`].
pub struct ProblemRegistry {
    source: Option<Arc<dyn ProblemSource>>,
    builtin: HashMap<i64, ProblemContext>,
}

impl Default for ProblemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProblemRegistry {
    /// Registry over the built-in problem set only.
    pub fn new() -> Self {
        let mut builtin = HashMap::new();
        builtin.insert(10, builtin_tsp());
        builtin.insert(11, builtin_fibonacci());
        Self {
            source: None,
            builtin,
        }
    }

    /// Attach a dynamic source consulted before the built-ins.
    pub fn with_source(mut self, source: Arc<dyn ProblemSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Resolve a spec. Source first; source failures fall back to the
    /// built-in map; an unknown spec yields a minimal placeholder.
    pub async fn resolve(&self, spec_id: i64) -> ProblemContext {
        if let Some(source) = &self.source {
            match source.fetch(spec_id).await {
                Ok(Some(context)) => {
                    debug!(spec_id, title = %context.basic_info.title, "problem resolved from source");
                    return context;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(spec_id, error = %e, "problem source failed, using built-in");
                }
            }
        }
        self.builtin
            .get(&spec_id)
            .cloned()
            .unwrap_or_else(|| ProblemContext::unknown(spec_id))
    }
}

/// Built-in spec 10: Traveling Salesman (bitmask DP).
fn builtin_tsp() -> ProblemContext {
    ProblemContext {
        basic_info: BasicInfo {
            problem_id: "2098".into(),
            title: "Traveling Salesman Circuit".into(),
            description_summary: "Starting from city 1, visit every city exactly once and \
                                  return to city 1 along the minimum-cost route."
                .into(),
            input_format: "First line: city count N (2 <= N <= 16). Next N lines: the cost \
                           matrix W, where W[i][j] is the cost of travelling from city i to \
                           city j (0 means the road does not exist)."
                .into(),
            output_format: "One line with the minimum circuit cost.".into(),
        },
        constraints: Constraints {
            time_limit_sec: 1.0,
            memory_limit_mb: 128,
            variable_ranges: BTreeMap::from([
                ("N".into(), "2 <= N <= 16".into()),
                ("Cost".into(), "0 <= W[i][j] <= 1,000,000".into()),
            ]),
            logic_reasoning: "N is at most 16, so O(N!) brute force times out; the intended \
                              solution is bitmask DP in O(N^2 * 2^N)."
                .into(),
        },
        ai_guide: AiGuide {
            key_algorithms: vec![
                "Dynamic Programming".into(),
                "Bitmasking".into(),
                "DFS".into(),
                "TSP".into(),
            ],
            solution_architecture: "Top-down DFS with memoization".into(),
            hint_roadmap: Some(HintRoadmap {
                step_1_concept: "N is small (16). Think about how to store the set of \
                                 visited cities compactly — bits instead of an array."
                    .into(),
                step_2_state: "Define the state as dp[current_city][visited_bitmask], \
                               where bit i of the mask means city i was visited."
                    .into(),
                step_3_transition: "FindPath(curr, visited) = min over unvisited next of \
                                    W[curr][next] + FindPath(next, visited | (1 << next))."
                    .into(),
                step_4_base_case: "When every city is visited (visited == (1<<N)-1), return \
                                   the cost back to the start city if that road exists."
                    .into(),
            }),
            common_pitfalls: vec![
                "Not checking for unreachable roads (W[i][j] == 0).".into(),
                "Initialising the DP table with 0, which conflates 'unvisited' with \
                 'cost 0'; use -1 or infinity."
                    .into(),
                "Not handling the case where the last city cannot return to the start."
                    .into(),
            ],
        },
        solution_code: r#"import sys

def tsp(current, visited):
    if visited == (1 << N) - 1:
        return W[current][0] if W[current][0] != 0 else float('inf')
    if dp[current][visited] != -1:
        return dp[current][visited]
    dp[current][visited] = float('inf')
    for i in range(N):
        if not (visited & (1 << i)) and W[current][i] != 0:
            dp[current][visited] = min(
                dp[current][visited], tsp(i, visited | (1 << i)) + W[current][i]
            )
    return dp[current][visited]

N = int(sys.stdin.readline())
W = [list(map(int, sys.stdin.readline().split())) for _ in range(N)]
dp = [[-1] * (1 << N) for _ in range(N)]
print(tsp(0, 1))
"#
        .into(),
        test_cases: vec![
            TestCase {
                input: "4\n0 10 15 20\n5 0 9 10\n6 13 0 12\n8 8 9 0\n".into(),
                expected: "35".into(),
                is_sample: true,
            },
            TestCase {
                input: "3\n0 1 2\n1 0 4\n2 4 0\n".into(),
                expected: "7".into(),
                is_sample: false,
            },
        ],
        keywords: vec![
            "외판원".into(),
            "tsp".into(),
            "traveling salesman".into(),
            "dp[현재도시][방문도시]".into(),
            "방문 상태".into(),
        ],
    }
}

/// Built-in spec 11: Fibonacci (linear DP).
fn builtin_fibonacci() -> ProblemContext {
    ProblemContext {
        basic_info: BasicInfo {
            problem_id: "2747".into(),
            title: "Fibonacci Number".into(),
            description_summary: "Given n, print the n-th Fibonacci number (F(0)=0, F(1)=1)."
                .into(),
            input_format: "One line with n (0 <= n <= 45).".into(),
            output_format: "One line with F(n).".into(),
        },
        constraints: Constraints {
            time_limit_sec: 1.0,
            memory_limit_mb: 128,
            variable_ranges: BTreeMap::from([("n".into(), "0 <= n <= 45".into())]),
            logic_reasoning: "Naive recursion is exponential; iterate or memoize for O(n).".into(),
        },
        ai_guide: AiGuide {
            key_algorithms: vec!["Dynamic Programming".into(), "Recursion".into()],
            solution_architecture: "Bottom-up iteration over two accumulators".into(),
            hint_roadmap: Some(HintRoadmap {
                step_1_concept: "Each number is the sum of the previous two; you only ever \
                                 need the last two values."
                    .into(),
                step_2_state: "Keep (previous, current) and advance them together.".into(),
                step_3_transition: "next = previous + current; shift the pair forward.".into(),
                step_4_base_case: "F(0)=0 and F(1)=1 seed the iteration.".into(),
            }),
            common_pitfalls: vec![
                "Recursing without memoization times out past n ≈ 35.".into(),
                "Off-by-one on the base cases.".into(),
            ],
        },
        solution_code: r#"n = int(input())
a, b = 0, 1
for _ in range(n):
    a, b = b, a + b
print(a)
"#
        .into(),
        test_cases: vec![
            TestCase {
                input: "10\n".into(),
                expected: "55".into(),
                is_sample: true,
            },
            TestCase {
                input: "0\n".into(),
                expected: "0".into(),
                is_sample: false,
            },
            TestCase {
                input: "45\n".into(),
                expected: "1134903170".into(),
                is_sample: false,
            },
        ],
        keywords: vec!["피보나치".into(), "fibonacci".into(), "점화식".into()],
    }
}

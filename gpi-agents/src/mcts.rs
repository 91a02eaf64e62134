use candle_core::{Result, bail};
use gpi_core::callback::Callback;
use gpi_core::task::Task;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use std::f64::consts::FRAC_1_SQRT_2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeId(usize);

/// A reached state. Child edges are created once at node construction, one per
/// possible action, and never added to afterwards. Terminal states simply get
/// no edges.
pub struct Node<T: Task> {
    pub state: T::State,
    pub parent_edge: Option<EdgeId>,
    pub child_edges: Vec<EdgeId>,
}

/// One action out of a node. The child node is built lazily, at most once, and
/// the edge accumulates visit counts and an incrementally updated average
/// reward during backpropagation.
pub struct Edge<T: Task> {
    pub action: T::Action,
    pub parent_node: NodeId,
    pub child_node: Option<NodeId>,
    pub visit_count: u64,
    pub average_reward: f64,
}

/// Arena holding the search tree. Nodes and edges reference each other through
/// indices, which keeps parent back-references trivial.
pub struct SearchTree<T: Task> {
    nodes: Vec<Node<T>>,
    edges: Vec<Edge<T>>,
}

impl<T: Task> SearchTree<T> {
    pub fn new(task: &T, root_state: T::State) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        };
        tree.add_node(task, root_state, None);
        tree
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node<T> {
        &self.nodes[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge<T> {
        &self.edges[id.0]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge<T> {
        &mut self.edges[id.0]
    }

    /// Total visits through a node, the sum over its child edges.
    pub fn node_visit_count(&self, id: NodeId) -> u64 {
        self.node(id)
            .child_edges
            .iter()
            .map(|edge_id| self.edge(*edge_id).visit_count)
            .sum()
    }

    pub fn has_unvisited_edge(&self, id: NodeId) -> bool {
        self.node(id)
            .child_edges
            .iter()
            .any(|edge_id| self.edge(*edge_id).child_node.is_none())
    }

    pub fn first_unvisited_edge(&self, id: NodeId) -> Option<EdgeId> {
        self.node(id)
            .child_edges
            .iter()
            .copied()
            .find(|edge_id| self.edge(*edge_id).child_node.is_none())
    }

    /// Materializes the child node behind `edge_id`. Building twice is a
    /// protocol violation.
    pub fn build_child(&mut self, task: &T, edge_id: EdgeId) -> Result<NodeId> {
        if self.edge(edge_id).child_node.is_some() {
            bail!("the child node of this edge was already built");
        }
        let parent_node = self.edge(edge_id).parent_node;
        let child_state =
            task.transit_state(&self.node(parent_node).state, &self.edge(edge_id).action);
        let child = self.add_node(task, child_state, Some(edge_id));
        self.edge_mut(edge_id).child_node = Some(child);
        Ok(child)
    }

    /// Walks from `leaf` back to the root, bumping every traversed edge's
    /// visit count and folding `reward` into its running average.
    pub fn backpropagate(&mut self, leaf: NodeId, reward: f64) {
        let mut current = leaf;
        while let Some(edge_id) = self.node(current).parent_edge {
            let edge = self.edge_mut(edge_id);
            edge.visit_count += 1;
            edge.average_reward += (reward - edge.average_reward) / edge.visit_count as f64;
            current = edge.parent_node;
        }
    }

    fn add_node(&mut self, task: &T, state: T::State, parent_edge: Option<EdgeId>) -> NodeId {
        let node_id = NodeId(self.nodes.len());
        let actions = task.generate_possible_actions(&state);
        let mut child_edges = Vec::with_capacity(actions.len());
        for action in actions {
            let edge_id = EdgeId(self.edges.len());
            self.edges.push(Edge {
                action,
                parent_node: node_id,
                child_node: None,
                visit_count: 0,
                average_reward: 0.0,
            });
            child_edges.push(edge_id);
        }
        self.nodes.push(Node {
            state,
            parent_edge,
            child_edges,
        });
        node_id
    }
}

/// Scores an edge during the select descent. Kept separate from the greedy
/// final-answer comparison: selection may explore, the reported action never
/// does.
pub trait EdgeEvaluator {
    fn edge_score(&self, visit_count: u64, average_reward: f64, parent_visit_count: u64) -> f64;
}

/// Upper confidence bound applied to trees. Unvisited edges score infinite so
/// every edge is explored before any is exploited. The default exploration
/// constant is calibrated for rewards in [0, 1].
pub struct Uct {
    pub exploration_constant: f64,
}

impl Uct {
    pub fn new(exploration_constant: f64) -> Self {
        Self {
            exploration_constant,
        }
    }
}

impl Default for Uct {
    fn default() -> Self {
        Self::new(FRAC_1_SQRT_2)
    }
}

impl EdgeEvaluator for Uct {
    fn edge_score(&self, visit_count: u64, average_reward: f64, parent_visit_count: u64) -> f64 {
        if visit_count == 0 {
            return f64::INFINITY;
        }
        let exploration = 2.0
            * self.exploration_constant
            * (2.0 * (parent_visit_count as f64).ln() / visit_count as f64).sqrt();
        average_reward + exploration
    }
}

/// Rollout policy used by the playout phase.
pub trait PlayoutPolicy<T: Task> {
    fn playout(&mut self, task: &T, state: &T::State) -> Result<f64>;
}

/// Walks uniformly random actions from the given state to a terminal state
/// and reports its reward. The default playout.
pub struct RandomPlayout {
    rng: StdRng,
}

impl RandomPlayout {
    pub fn new(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl<T: Task> PlayoutPolicy<T> for RandomPlayout {
    fn playout(&mut self, task: &T, state: &T::State) -> Result<f64> {
        let mut state = state.clone();
        while !task.is_terminal_state(&state) {
            let actions = task.generate_possible_actions(&state);
            let Some(action) = actions.choose(&mut self.rng) else {
                bail!("no possible action during playout, the task violates its contract");
            };
            state = task.transit_state(&state, action);
        }
        Ok(task.calculate_reward(&state))
    }
}

/// Adapter so a closure can serve as the playout policy.
pub struct PlayoutFn<F>(pub F);

impl<T, F> PlayoutPolicy<T> for PlayoutFn<F>
where
    T: Task,
    F: FnMut(&T, &T::State) -> Result<f64>,
{
    fn playout(&mut self, task: &T, state: &T::State) -> Result<f64> {
        (self.0)(task, state)
    }
}

/// Monte Carlo tree search. A planning procedure invoked per decision: each
/// iteration selects a promising leaf, expands one unvisited edge, plays the
/// new state out to a terminal reward and backpropagates it to the root. The
/// finish rule bounds the iterations; the answer is the root edge with the
/// best average reward.
pub struct Mcts<T: Task, E: EdgeEvaluator> {
    pub task: T,
    evaluator: E,
    playout_policy: Box<dyn PlayoutPolicy<T>>,
    pub last_calculated_tree: Option<SearchTree<T>>,
}

impl<T: Task, E: EdgeEvaluator> Mcts<T, E> {
    pub fn new(task: T, evaluator: E, rng: StdRng) -> Self {
        Self {
            task,
            evaluator,
            playout_policy: Box::new(RandomPlayout::new(rng)),
            last_calculated_tree: None,
        }
    }

    pub fn set_playout_policy(&mut self, playout_policy: Box<dyn PlayoutPolicy<T>>) {
        self.playout_policy = playout_policy;
    }

    pub fn planning(
        &mut self,
        state: &T::State,
        finish_rule: &mut dyn Callback<T, ()>,
    ) -> Result<T::Action> {
        if self.task.is_terminal_state(state) {
            bail!("cannot run a tree search from a terminal state");
        }
        finish_rule.before_gpi_start(&self.task, &())?;
        let mut tree = SearchTree::new(&self.task, state.clone());
        let mut iteration_count = 0;
        while !finish_rule.interrupt_gpi(iteration_count, &self.task, &())? {
            finish_rule.before_update(iteration_count, &self.task, &())?;

            let selected = self.select(&tree);
            let selected_state = tree.node(selected).state.clone();
            let (leaf, reward) = if self.task.is_terminal_state(&selected_state) {
                (selected, self.task.calculate_reward(&selected_state))
            } else {
                let leaf = self.expand(&mut tree, selected)?;
                let leaf_state = tree.node(leaf).state.clone();
                let reward = self.playout_policy.playout(&self.task, &leaf_state)?;
                (leaf, reward)
            };
            tree.backpropagate(leaf, reward);

            finish_rule.after_update(iteration_count, &self.task, &())?;
            iteration_count += 1;
        }

        let root = tree.root();
        let best_edge = tree
            .node(root)
            .child_edges
            .iter()
            .copied()
            .max_by(|a, b| {
                tree.edge(*a)
                    .average_reward
                    .total_cmp(&tree.edge(*b).average_reward)
            });
        let Some(best_edge) = best_edge else {
            bail!("the root node has no edge to choose an action from");
        };
        let action = tree.edge(best_edge).action.clone();
        self.last_calculated_tree = Some(tree);
        Ok(action)
    }

    /// Descends from the root along the evaluator's best edges until reaching
    /// a terminal state or a node that still has an unexpanded edge.
    fn select(&self, tree: &SearchTree<T>) -> NodeId {
        let mut target = tree.root();
        while !self.task.is_terminal_state(&tree.node(target).state)
            && !tree.has_unvisited_edge(target)
        {
            let parent_visit_count = tree.node_visit_count(target);
            let best_edge = tree.node(target).child_edges.iter().copied().max_by(|a, b| {
                let score_a = self.score(tree, *a, parent_visit_count);
                let score_b = self.score(tree, *b, parent_visit_count);
                score_a.total_cmp(&score_b)
            });
            let Some(best_edge) = best_edge else {
                break;
            };
            let Some(child) = tree.edge(best_edge).child_node else {
                break;
            };
            target = child;
        }
        target
    }

    fn expand(&self, tree: &mut SearchTree<T>, node: NodeId) -> Result<NodeId> {
        let Some(edge) = tree.first_unvisited_edge(node) else {
            bail!("tried to expand a node with no unvisited edge left");
        };
        tree.build_child(&self.task, edge)
    }

    fn score(&self, tree: &SearchTree<T>, edge_id: EdgeId, parent_visit_count: u64) -> f64 {
        let edge = tree.edge(edge_id);
        self.evaluator
            .edge_score(edge.visit_count, edge.average_reward, parent_visit_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpi_core::callback::WatchIterationCount;
    use rand::SeedableRng;

    struct TwoBranchTask;

    impl Task for TwoBranchTask {
        type State = &'static str;
        type Action = u32;

        fn generate_initial_state(&self) -> &'static str {
            "A"
        }

        fn is_terminal_state(&self, state: &&'static str) -> bool {
            matches!(*state, "C" | "E" | "F")
        }

        fn transit_state(&self, state: &&'static str, action: &u32) -> &'static str {
            match (*state, action) {
                ("A", 1) => "B",
                ("A", 5) => "F",
                ("B", 2) => "C",
                ("B", 3) => "D",
                ("D", 4) => "E",
                _ => unreachable!(),
            }
        }

        fn generate_possible_actions(&self, state: &&'static str) -> Vec<u32> {
            match *state {
                "A" => vec![1, 5],
                "B" => vec![2, 3],
                "D" => vec![4],
                _ => vec![],
            }
        }

        fn calculate_reward(&self, state: &&'static str) -> f64 {
            match *state {
                "C" => 0.5,
                "E" => 0.1,
                "F" => 1.0,
                _ => 0.0,
            }
        }
    }

    #[test]
    fn uct_scores_unvisited_edges_infinite() {
        let uct = Uct::default();
        assert_eq!(f64::INFINITY, uct.edge_score(0, 0.0, 10));
    }

    #[test]
    fn uct_scores_match_the_formula() {
        let uct = Uct::default();
        assert!((uct.edge_score(1, 0.0, 1) - 0.0).abs() < 1e-4);
        assert!((uct.edge_score(1, 0.0, 2) - 1.6651092223153954).abs() < 1e-4);
        assert!((uct.edge_score(2, 0.5, 3) - 1.982303807367511).abs() < 1e-4);
    }

    #[test]
    fn backpropagation_updates_every_edge_up_to_the_root() {
        let task = TwoBranchTask;
        let mut tree = SearchTree::new(&task, "A");
        let root = tree.root();
        let edge_to_b = tree.node(root).child_edges[0];
        let edge_to_f = tree.node(root).child_edges[1];
        let node_b = tree.build_child(&task, edge_to_b).unwrap();
        let node_f = tree.build_child(&task, edge_to_f).unwrap();
        let edge_to_c = tree.node(node_b).child_edges[0];
        let edge_to_d = tree.node(node_b).child_edges[1];
        let node_c = tree.build_child(&task, edge_to_c).unwrap();
        let node_d = tree.build_child(&task, edge_to_d).unwrap();
        let edge_to_e = tree.node(node_d).child_edges[0];
        let node_e = tree.build_child(&task, edge_to_e).unwrap();

        let edge_stats = |tree: &SearchTree<TwoBranchTask>, id: EdgeId| {
            (tree.edge(id).average_reward, tree.edge(id).visit_count)
        };

        tree.backpropagate(node_b, 1.0);
        assert_eq!((1.0, 1), edge_stats(&tree, edge_to_b));
        tree.backpropagate(node_c, 3.0);
        assert_eq!((2.0, 2), edge_stats(&tree, edge_to_b));
        assert_eq!((3.0, 1), edge_stats(&tree, edge_to_c));
        tree.backpropagate(node_d, 5.0);
        assert_eq!((3.0, 3), edge_stats(&tree, edge_to_b));
        assert_eq!((5.0, 1), edge_stats(&tree, edge_to_d));
        tree.backpropagate(node_e, -1.0);
        assert_eq!((2.0, 4), edge_stats(&tree, edge_to_b));
        assert_eq!((2.0, 2), edge_stats(&tree, edge_to_d));
        assert_eq!((-1.0, 1), edge_stats(&tree, edge_to_e));
        tree.backpropagate(node_f, 5.0);
        assert_eq!((2.0, 4), edge_stats(&tree, edge_to_b));
        assert_eq!((5.0, 1), edge_stats(&tree, edge_to_f));
    }

    #[test]
    fn a_child_can_only_be_built_once() {
        let task = TwoBranchTask;
        let mut tree = SearchTree::new(&task, "A");
        let edge = tree.node(tree.root()).child_edges[0];
        tree.build_child(&task, edge).unwrap();
        assert!(tree.build_child(&task, edge).is_err());
    }

    #[test]
    fn planning_returns_a_legal_root_action() {
        let task = TwoBranchTask;
        let mut mcts = Mcts::new(task, Uct::default(), StdRng::seed_from_u64(0));
        let mut finish_rule = WatchIterationCount::new(20, false);
        let action = mcts.planning(&"A", &mut finish_rule).unwrap();
        assert!(action == 1 || action == 5);
        let tree = mcts.last_calculated_tree.as_ref().unwrap();
        assert_eq!(20, tree.node_visit_count(tree.root()));
    }

    #[test]
    fn planning_from_a_terminal_state_is_an_error() {
        let task = TwoBranchTask;
        let mut mcts = Mcts::new(task, Uct::default(), StdRng::seed_from_u64(0));
        let mut finish_rule = WatchIterationCount::new(1, false);
        assert!(mcts.planning(&"F", &mut finish_rule).is_err());
    }
}

pub mod deep_q_learning;
pub mod eligibility_trace;
pub mod mcts;
pub mod montecarlo;
pub mod q_lambda;
pub mod q_learning;
pub mod sarsa;
pub mod sarsa_lambda;
mod td;

use courier_common::traits::fsm::FiniteStateMachine;

use crate::{command::Command, reply::Reply, session_state::SessionState, state::State};

impl FiniteStateMachine for State {
    type Input = Command;
    type Context = SessionState;
    type Output = Reply;

    fn transition(self, input: Self::Input, context: &mut Self::Context) -> (Self, Self::Output) {
        self.transition_protocol(input, context)
    }
}

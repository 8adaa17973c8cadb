pub trait FiniteStateMachine {
    type Input;
    type Context;
    type Output;

    /// Consume the current state and produce the next one, along with the
    /// outcome the caller should report for `input`.
    #[must_use]
    fn transition(self, input: Self::Input, context: &mut Self::Context) -> (Self, Self::Output)
    where
        Self: Sized;
}

//! Defines the Component trait, used by every processing stage that sits
//! downstream of a session. A component consumes one item from the
//! preceding stage, processes it, and passes the result on to the next.

use crate::error::Result;
use log::{info, warn};
use std::fmt::Display;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

///
/// A stage in the acquisition pipeline, such as summarizing decoded blocks
/// for display. All structs that perform a processing step on decoded data
/// implement Component, so that they can be chained on their own threads.
///
pub trait Component: Display {
    /// What the component consumes
    type InData;
    /// What the component produces
    type OutData;

    /// Converts an input of type InData into an output of type OutData
    fn convert(&mut self, input: Self::InData) -> Self::OutData;

    /// Cleans up at termination of pipeline
    fn finalize(&mut self) -> Result<()>;
}

/// Runs the given Component on its own thread. On receiving data of type
/// InData on the input channel, the Component converts them to data of type
/// OutData and sends it to the output channel. The thread ends once the
/// input channel is closed.
pub fn run_component<C: Component + Send + 'static>(
    mut component: Box<C>,
    input: Receiver<<C as Component>::InData>,
    output: Sender<<C as Component>::OutData>,
) -> JoinHandle<()>
where
    <C as Component>::InData: Send + 'static,
    <C as Component>::OutData: Send + 'static,
{
    thread::spawn(move || {
        while let Ok(data) = input.recv() {
            let out_data = component.convert(data);
            if let Err(error) = output.send(out_data) {
                warn!("{} : received error {}.", component, error);
            }
        }

        if let Err(component_error) = component.finalize() {
            warn!("{} : error during terminating : {component_error}.", component);
        }
        info!("{} : terminated.", component);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::mpsc::channel;

    /// Adds one to whatever it gets
    struct MockComponent {}

    impl MockComponent {
        fn new() -> Self {
            Self {}
        }
    }

    impl Component for MockComponent {
        type InData = i32;
        type OutData = i32;

        fn convert(&mut self, input: i32) -> i32 {
            input + 1
        }

        fn finalize(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl Display for MockComponent {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "MockComponent")
        }
    }

    /// Checks that writing a value to the Component's input produces that
    /// value, converted, in the Component's output
    #[test]
    fn test_mock_component() {
        let mock_comp = MockComponent::new();
        let (test_tx, block_rx) = channel::<i32>();
        let (block_tx, test_rx) = channel::<i32>();

        run_component(Box::new(mock_comp), block_rx, block_tx);

        assert_eq!(test_tx.send(0), Ok(()));
        assert_eq!(test_rx.recv(), Ok(1));
    }

    #[test]
    fn test_chained_component() {
        let mock_comp_a = MockComponent::new();
        let mock_comp_b = MockComponent::new();

        let (test_tx, block_a_rx) = channel::<i32>();
        let (block_a_tx, block_b_rx) = channel::<i32>();
        let (block_b_tx, test_rx) = channel::<i32>();

        run_component(Box::new(mock_comp_a), block_a_rx, block_a_tx);
        run_component(Box::new(mock_comp_b), block_b_rx, block_b_tx);

        assert_eq!(test_tx.send(0), Ok(()));
        assert_eq!(test_rx.recv(), Ok(2));
    }

    #[test]
    fn thread_ends_with_its_input() {
        let (test_tx, rx) = channel::<i32>();
        let (tx, _test_rx) = channel::<i32>();
        let handle = run_component(Box::new(MockComponent::new()), rx, tx);
        drop(test_tx);
        assert!(handle.join().is_ok());
    }
}

//! Per-iteration callbacks for iterative fitting loops.

/// Action a callback can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Called by a fitting loop after every iteration with the model being fit.
pub trait IterationCallback<T: ?Sized> {
    type Error;

    fn on_iteration(&mut self, trainer: &T) -> Result<CallbackAction, Self::Error>;
}

impl<T: ?Sized, C: IterationCallback<T> + ?Sized> IterationCallback<T> for &mut C {
    type Error = C::Error;

    fn on_iteration(&mut self, trainer: &T) -> Result<CallbackAction, Self::Error> {
        (**self).on_iteration(trainer)
    }
}

/// Invoke every callback in order. All callbacks run even when an earlier
/// one asks to stop; the first error aborts the rest.
pub fn run_callbacks<T: ?Sized, E>(
    callbacks: &mut [Box<dyn IterationCallback<T, Error = E> + '_>],
    trainer: &T,
) -> Result<CallbackAction, E> {
    let mut action = CallbackAction::Continue;
    for callback in callbacks.iter_mut() {
        if callback.on_iteration(trainer)? == CallbackAction::Stop {
            action = CallbackAction::Stop;
        }
    }
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Model {
        n_iter: usize,
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<usize>,
    }

    impl IterationCallback<Model> for Recorder {
        type Error = String;

        fn on_iteration(&mut self, trainer: &Model) -> Result<CallbackAction, String> {
            self.seen.push(trainer.n_iter);
            Ok(CallbackAction::Continue)
        }
    }

    struct StopAt(usize);

    impl IterationCallback<Model> for StopAt {
        type Error = String;

        fn on_iteration(&mut self, trainer: &Model) -> Result<CallbackAction, String> {
            if trainer.n_iter >= self.0 {
                Ok(CallbackAction::Stop)
            } else {
                Ok(CallbackAction::Continue)
            }
        }
    }

    struct Diverged;

    impl IterationCallback<Model> for Diverged {
        type Error = String;

        fn on_iteration(&mut self, _trainer: &Model) -> Result<CallbackAction, String> {
            Err("diverged".to_string())
        }
    }

    #[test]
    fn test_all_callbacks_run_and_stop_propagates() {
        let mut recorder = Recorder::default();
        {
            let mut callbacks: Vec<Box<dyn IterationCallback<Model, Error = String> + '_>> =
                vec![Box::new(StopAt(3)), Box::new(&mut recorder)];
            for n_iter in 1..=5 {
                let action = run_callbacks(&mut callbacks, &Model { n_iter }).unwrap();
                if action == CallbackAction::Stop {
                    break;
                }
            }
        }
        assert_eq!(recorder.seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_error_aborts_remaining_callbacks() {
        let mut recorder = Recorder::default();
        {
            let mut callbacks: Vec<Box<dyn IterationCallback<Model, Error = String> + '_>> =
                vec![Box::new(Diverged), Box::new(&mut recorder)];
            let err = run_callbacks(&mut callbacks, &Model { n_iter: 1 }).unwrap_err();
            assert_eq!(err, "diverged");
        }
        assert!(recorder.seen.is_empty());
    }
}

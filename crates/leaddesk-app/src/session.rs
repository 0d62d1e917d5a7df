// Operator sign-in state.

use serde::Serialize;

use leaddesk_core::{CoreError, Identity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionState {
    SignedOut,
    SigningIn,
    SignedIn(Identity),
    SigningOut,
}

/// Transitions: `SignedOut -> SigningIn -> SignedIn | SignedOut`,
/// `SignedIn -> SigningOut -> SignedOut`. Anything else is rejected.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Session {
            state: SessionState::SignedOut,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self.state, SessionState::SignedIn(_))
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::SignedIn(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn begin_sign_in(&mut self) -> Result<(), CoreError> {
        match self.state {
            SessionState::SignedOut => {
                self.state = SessionState::SigningIn;
                Ok(())
            }
            _ => Err(self.rejected("sign in")),
        }
    }

    /// Finish a sign-in attempt. A failed attempt returns to `SignedOut`
    /// and hands the error back.
    pub fn complete_sign_in(
        &mut self,
        outcome: Result<Identity, CoreError>,
    ) -> Result<Identity, CoreError> {
        if self.state != SessionState::SigningIn {
            return Err(self.rejected("complete sign in"));
        }
        match outcome {
            Ok(identity) => {
                self.state = SessionState::SignedIn(identity.clone());
                Ok(identity)
            }
            Err(e) => {
                self.state = SessionState::SignedOut;
                Err(e)
            }
        }
    }

    pub fn begin_sign_out(&mut self) -> Result<(), CoreError> {
        match self.state {
            SessionState::SignedIn(_) => {
                self.state = SessionState::SigningOut;
                Ok(())
            }
            _ => Err(self.rejected("sign out")),
        }
    }

    pub fn complete_sign_out(&mut self) -> Result<(), CoreError> {
        if self.state != SessionState::SigningOut {
            return Err(self.rejected("complete sign out"));
        }
        self.state = SessionState::SignedOut;
        Ok(())
    }

    fn rejected(&self, action: &str) -> CoreError {
        CoreError::invalid(format!("cannot {action} while {:?}", self.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator() -> Identity {
        Identity {
            email: "ops@broker.example".into(),
            display_name: "Ops".into(),
        }
    }

    #[test]
    fn full_cycle() {
        let mut session = Session::new();
        session.begin_sign_in().unwrap();
        assert_eq!(session.state(), &SessionState::SigningIn);
        session.complete_sign_in(Ok(operator())).unwrap();
        assert!(session.is_signed_in());
        assert_eq!(session.identity().unwrap().email, "ops@broker.example");

        session.begin_sign_out().unwrap();
        assert!(!session.is_signed_in());
        session.complete_sign_out().unwrap();
        assert_eq!(session.state(), &SessionState::SignedOut);
    }

    #[test]
    fn failed_sign_in_returns_to_signed_out() {
        let mut session = Session::new();
        session.begin_sign_in().unwrap();
        let err = session
            .complete_sign_in(Err(CoreError::AuthError("popup closed".into())))
            .unwrap_err();
        assert_eq!(err, CoreError::AuthError("popup closed".into()));
        assert_eq!(session.state(), &SessionState::SignedOut);
    }

    #[test]
    fn out_of_order_transitions_are_rejected() {
        let mut session = Session::new();
        assert!(session.begin_sign_out().is_err());
        assert!(session.complete_sign_out().is_err());
        assert!(session.complete_sign_in(Ok(operator())).is_err());

        session.begin_sign_in().unwrap();
        assert!(matches!(
            session.begin_sign_in(),
            Err(CoreError::InvalidArgument(_))
        ));
    }
}

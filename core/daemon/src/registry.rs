//! Machine and user registration.

use chrono::{DateTime, Utc};
use zara_shiftd_protocol::{MachineStatus, RegisterMachineParams, RegisterUserParams};

use crate::db;
use crate::error::{Result, ShiftError};
use crate::model::{format_timestamp, new_id, Machine, User};
use crate::state::SharedState;

impl SharedState {
    /// New machines start STOPPED. Codes are unique.
    pub fn register_machine(
        &self,
        params: &RegisterMachineParams,
        now: DateTime<Utc>,
    ) -> Result<Machine> {
        let code = params.code.trim();
        let timestamp = format_timestamp(now);
        let machine = Machine {
            id: new_id(),
            code: code.to_string(),
            name: params.name.trim().to_string(),
            location: params
                .location
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            status: MachineStatus::Stopped,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        };

        self.db().with_transaction(|tx| {
            if db::get_machine_by_code(tx, code)?.is_some() {
                return Err(ShiftError::Conflict(format!(
                    "machine code {} is already registered",
                    code
                )));
            }
            db::insert_machine(tx, &machine)
        })?;

        tracing::info!(machine_id = %machine.id, code = %machine.code, "Machine registered");
        Ok(machine)
    }

    /// Emails, when given, are unique.
    pub fn register_user(&self, params: &RegisterUserParams, now: DateTime<Utc>) -> Result<User> {
        let user = User {
            id: new_id(),
            name: params.name.trim().to_string(),
            email: params
                .email
                .as_deref()
                .map(|email| email.trim().to_ascii_lowercase()),
            role: params.role,
            is_active: true,
            created_at: format_timestamp(now),
        };

        self.db().with_transaction(|tx| {
            if let Some(email) = &user.email {
                if db::get_user_by_email(tx, email)?.is_some() {
                    return Err(ShiftError::Conflict(format!(
                        "email {} is already registered",
                        email
                    )));
                }
            }
            db::insert_user(tx, &user)
        })?;

        tracing::info!(user_id = %user.id, role = user.role.as_str(), "User registered");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ShiftError;
    use crate::state::test_support::*;
    use zara_shiftd_protocol::{
        MachineStatus, RegisterMachineParams, RegisterUserParams, UserRole,
    };

    #[test]
    fn registers_machine_stopped() {
        let test = test_state();
        let machine = test
            .state
            .register_machine(
                &RegisterMachineParams {
                    code: " INJ-01 ".to_string(),
                    name: "Injetora 1".to_string(),
                    location: Some("  ".to_string()),
                },
                at("2026-03-10T06:00:00Z"),
            )
            .expect("register");
        assert_eq!(machine.code, "INJ-01");
        assert_eq!(machine.status, MachineStatus::Stopped);
        assert_eq!(machine.location, None);
    }

    #[test]
    fn duplicate_machine_code_conflicts() {
        let test = test_state();
        let params = RegisterMachineParams {
            code: "INJ-01".to_string(),
            name: "Injetora 1".to_string(),
            location: None,
        };
        let now = at("2026-03-10T06:00:00Z");
        test.state.register_machine(&params, now).expect("first");
        let err = test.state.register_machine(&params, now).unwrap_err();
        assert!(matches!(err, ShiftError::Conflict(_)));
    }

    #[test]
    fn duplicate_email_conflicts_case_insensitively() {
        let test = test_state();
        let now = at("2026-03-10T06:00:00Z");
        test.state
            .register_user(
                &RegisterUserParams {
                    name: "Ana".to_string(),
                    role: UserRole::Operator,
                    email: Some("ana@zara.example".to_string()),
                },
                now,
            )
            .expect("first");
        let err = test
            .state
            .register_user(
                &RegisterUserParams {
                    name: "Ana Souza".to_string(),
                    role: UserRole::Leader,
                    email: Some("ANA@zara.example".to_string()),
                },
                now,
            )
            .unwrap_err();
        assert!(matches!(err, ShiftError::Conflict(_)));
    }
}

//! Subcommands and their mapping onto protocol requests.

use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;
use zara_shiftd_protocol::{
    EndOperationParams, GetActiveShiftsParams, GetArchivesParams, GetNotificationsParams,
    MachineStatus, Method, RecordProductionParams, RecordQualityTestParams, RegisterMachineParams,
    RegisterUserParams, RunRolloverParams, SetMachineStatusParams, StartOperationParams,
    SweepStuckOperationsParams, UserRole,
};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show daemon health and job status
    Health,

    /// Manage machines
    #[command(subcommand)]
    Machine(MachineCommand),

    /// Manage users
    #[command(subcommand)]
    User(UserCommand),

    /// Start or end machine operations
    #[command(subcommand)]
    Op(OpCommand),

    /// Record produced pieces for a machine's open shift
    Produce(ProduceArgs),

    /// Record a quality test result
    Quality {
        machine_id: String,
        operator_id: String,
        /// Record the test as rejected (default: approved)
        #[arg(long)]
        rejected: bool,
    },

    /// Archive elapsed shifts and open the current ones
    Rollover {
        /// Evaluate shift boundaries at this RFC 3339 instant
        #[arg(long)]
        now: Option<String>,
    },

    /// Cancel operations that were never ended
    Sweep {
        #[arg(long)]
        max_age_hours: Option<u32>,
    },

    /// List open shifts
    Shifts {
        #[arg(long)]
        machine: Option<String>,
    },

    /// List archived shifts, newest first
    Archives {
        #[arg(long)]
        machine: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List a user's notifications
    Notifications {
        user_id: String,
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Debug, Subcommand)]
pub enum MachineCommand {
    /// Register a machine (starts STOPPED)
    Add {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        location: Option<String>,
    },

    /// Set a machine's status (RUNNING, STOPPED, MAINTENANCE, ERROR, TESTING)
    Status {
        machine_id: String,
        #[arg(value_parser = parse_machine_status)]
        status: MachineStatus,
    },
}

#[derive(Debug, Subcommand)]
pub enum UserCommand {
    /// Register a user (ADMIN, MANAGER, LEADER, OPERATOR)
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, value_parser = parse_user_role)]
        role: UserRole,
        #[arg(long)]
        email: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum OpCommand {
    Start {
        machine_id: String,
        operator_id: String,
        #[arg(long)]
        notes: Option<String>,
    },
    End {
        operation_id: String,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct ProduceArgs {
    machine_id: String,
    operator_id: String,
    /// Pieces produced since the last report
    #[arg(long, allow_negative_numbers = true)]
    total: i64,
    /// Minutes of downtime
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    downtime: i64,
    /// Minutes of running time
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    running_time: i64,
    /// Replace the shift target
    #[arg(long, allow_negative_numbers = true)]
    target: Option<i64>,
}

impl Command {
    pub fn to_call(&self) -> Result<(Method, Option<Value>), serde_json::Error> {
        let call = match self {
            Command::Health => (Method::GetHealth, None),
            Command::Machine(MachineCommand::Add {
                code,
                name,
                location,
            }) => params(
                Method::RegisterMachine,
                &RegisterMachineParams {
                    code: code.clone(),
                    name: name.clone(),
                    location: location.clone(),
                },
            )?,
            Command::Machine(MachineCommand::Status { machine_id, status }) => params(
                Method::SetMachineStatus,
                &SetMachineStatusParams {
                    machine_id: machine_id.clone(),
                    status: *status,
                },
            )?,
            Command::User(UserCommand::Add { name, role, email }) => params(
                Method::RegisterUser,
                &RegisterUserParams {
                    name: name.clone(),
                    role: *role,
                    email: email.clone(),
                },
            )?,
            Command::Op(OpCommand::Start {
                machine_id,
                operator_id,
                notes,
            }) => params(
                Method::StartOperation,
                &StartOperationParams {
                    machine_id: machine_id.clone(),
                    operator_id: operator_id.clone(),
                    notes: notes.clone(),
                },
            )?,
            Command::Op(OpCommand::End {
                operation_id,
                notes,
            }) => params(
                Method::EndOperation,
                &EndOperationParams {
                    operation_id: operation_id.clone(),
                    notes: notes.clone(),
                },
            )?,
            Command::Produce(args) => params(
                Method::RecordProduction,
                &RecordProductionParams {
                    machine_id: args.machine_id.clone(),
                    operator_id: args.operator_id.clone(),
                    total_production: args.total,
                    downtime: args.downtime,
                    running_time: args.running_time,
                    target_production: args.target,
                },
            )?,
            Command::Quality {
                machine_id,
                operator_id,
                rejected,
            } => params(
                Method::RecordQualityTest,
                &RecordQualityTestParams {
                    machine_id: machine_id.clone(),
                    operator_id: operator_id.clone(),
                    approved: !rejected,
                },
            )?,
            Command::Rollover { now } => params(
                Method::RunRollover,
                &RunRolloverParams { now: now.clone() },
            )?,
            Command::Sweep { max_age_hours } => params(
                Method::SweepStuckOperations,
                &SweepStuckOperationsParams {
                    max_age_hours: *max_age_hours,
                },
            )?,
            Command::Shifts { machine } => params(
                Method::GetActiveShifts,
                &GetActiveShiftsParams {
                    machine_id: machine.clone(),
                },
            )?,
            Command::Archives { machine, limit } => params(
                Method::GetArchives,
                &GetArchivesParams {
                    machine_id: machine.clone(),
                    limit: *limit,
                },
            )?,
            Command::Notifications {
                user_id,
                unread,
                limit,
            } => params(
                Method::GetNotifications,
                &GetNotificationsParams {
                    user_id: user_id.clone(),
                    unread_only: *unread,
                    limit: *limit,
                },
            )?,
        };
        Ok(call)
    }
}

fn params<T: Serialize>(
    method: Method,
    value: &T,
) -> Result<(Method, Option<Value>), serde_json::Error> {
    Ok((method, Some(serde_json::to_value(value)?)))
}

fn parse_machine_status(value: &str) -> Result<MachineStatus, String> {
    MachineStatus::from_str(&value.to_ascii_uppercase())
        .ok_or_else(|| format!("unknown machine status: {}", value))
}

fn parse_user_role(value: &str) -> Result<UserRole, String> {
    UserRole::from_str(&value.to_ascii_uppercase())
        .ok_or_else(|| format!("unknown role: {}", value))
}

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ledgerline_core::aggregate::{AggregateRoot, EventRecorder};
use ledgerline_core::clock::Clock;
use ledgerline_core::crypto::PersonalDataSchema;
use ledgerline_core::error::DomainError;
use ledgerline_core::event::{DomainEvent, Envelope, decode_payload, encode_payload, unknown_event};
use ledgerline_test_support::SteppingClock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const WALLET_OPENED: &str = "wallet.opened";
pub const WALLET_DEPOSITED: &str = "wallet.deposited";
const HOLDER_FIELDS: &[&str] = &["holder_name"];

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub fn clock() -> SteppingClock {
    SteppingClock::new(base_time(), Duration::minutes(1))
}

pub fn schema() -> PersonalDataSchema {
    PersonalDataSchema::new(&[(WALLET_OPENED, HOLDER_FIELDS)]).unwrap()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opened {
    pub owner_id: Uuid,
    pub holder_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposited {
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub enum WalletEvent {
    Opened(Opened),
    Deposited(Deposited),
}

impl DomainEvent for WalletEvent {
    fn event_name(&self) -> &'static str {
        match self {
            Self::Opened(_) => WALLET_OPENED,
            Self::Deposited(_) => WALLET_DEPOSITED,
        }
    }

    fn encode(&self) -> Result<serde_json::Value, DomainError> {
        match self {
            Self::Opened(p) => encode_payload(p),
            Self::Deposited(p) => encode_payload(p),
        }
    }

    fn decode(
        event_name: &str,
        event_version: i32,
        payload: serde_json::Value,
    ) -> Result<Self, DomainError> {
        match (event_name, event_version) {
            (WALLET_OPENED, 1) => Ok(Self::Opened(decode_payload(payload)?)),
            (WALLET_DEPOSITED, 1) => Ok(Self::Deposited(decode_payload(payload)?)),
            _ => Err(unknown_event(event_name, event_version)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletState {
    pub owner_id: Option<Uuid>,
    pub holder_name: Option<String>,
    pub balance: i64,
    pub deposits: u32,
}

/// Test aggregate carrying one personal-data field.
#[derive(Debug)]
pub struct Wallet {
    pub id: Uuid,
    pub version: i64,
    pub state: WalletState,
    recorder: EventRecorder<WalletEvent>,
}

impl Wallet {
    pub fn open(id: Uuid, owner_id: Uuid, holder_name: &str, clock: &dyn Clock) -> Self {
        let mut wallet = Self::empty(id);
        let metadata = wallet.next_metadata(Uuid::new_v4(), clock).owned_by(owner_id);
        wallet.raise(
            metadata,
            WalletEvent::Opened(Opened {
                owner_id,
                holder_name: holder_name.to_owned(),
            }),
        );
        wallet
    }

    pub fn deposit(&mut self, amount: i64, clock: &dyn Clock) {
        let mut metadata = self.next_metadata(Uuid::new_v4(), clock);
        metadata.owner_id = self.state.owner_id;
        self.raise(metadata, WalletEvent::Deposited(Deposited { amount }));
    }
}

impl AggregateRoot for Wallet {
    type Event = WalletEvent;
    const AGGREGATE_TYPE: &'static str = "wallet";

    fn empty(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            state: WalletState {
                owner_id: None,
                holder_name: None,
                balance: 0,
                deposits: 0,
            },
            recorder: EventRecorder::default(),
        }
    }

    fn restore(id: Uuid, version: i64, state: serde_json::Value) -> Result<Self, DomainError> {
        let mut wallet = Self::empty(id);
        wallet.version = version;
        wallet.state = decode_payload(state)?;
        Ok(wallet)
    }

    fn snapshot_state(&self) -> Result<serde_json::Value, DomainError> {
        encode_payload(&self.state)
    }

    fn personal_data_owner(&self) -> Option<Uuid> {
        self.state.owner_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Envelope<WalletEvent>) {
        match &event.kind {
            WalletEvent::Opened(p) => {
                self.state.owner_id = Some(p.owner_id);
                self.state.holder_name = Some(p.holder_name.clone());
            }
            WalletEvent::Deposited(p) => {
                self.state.balance += p.amount;
                self.state.deposits += 1;
            }
        }
        self.version = event.metadata.stream_version;
    }

    fn recorder(&self) -> &EventRecorder<WalletEvent> {
        &self.recorder
    }

    fn recorder_mut(&mut self) -> &mut EventRecorder<WalletEvent> {
        &mut self.recorder
    }
}

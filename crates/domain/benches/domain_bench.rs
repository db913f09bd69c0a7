use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    Aggregate, Command, CommandBus, CommandError, CommandHandler, CommandPayload, DomainEvent,
    InMemoryEventPublisher, MessageMetadata, PendingEvents, SYSTEM_USER, UnitOfWork,
    UnitOfWorkFactory,
};
use repository::{InMemoryRepository, RepositoryRegistry, Version};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Enrolled {
    campaign_id: String,
}

impl DomainEvent for Enrolled {
    fn event_type(&self) -> &'static str {
        "CampaignEnrollmentCompleted"
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Enrollment {
    id: AggregateId,
    campaign_id: String,
    version: Version,
    #[serde(skip)]
    pending: PendingEvents<Enrolled>,
}

impl Aggregate for Enrollment {
    type Event = Enrolled;

    fn aggregate_type() -> &'static str {
        "Enrollment"
    }

    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn pending_events(&self) -> &PendingEvents<Enrolled> {
        &self.pending
    }

    fn pending_events_mut(&mut self) -> &mut PendingEvents<Enrolled> {
        &mut self.pending
    }

    fn apply(&mut self, event: &Enrolled) {
        self.campaign_id = event.campaign_id.clone();
    }
}

#[derive(Debug)]
struct Enroll;

impl CommandPayload for Enroll {
    fn command_type(&self) -> &'static str {
        "Enroll"
    }
}

struct EnrollHandler;

#[async_trait]
impl CommandHandler<Enroll> for EnrollHandler {
    async fn handle(
        &self,
        _command: &Command<Enroll>,
        uow: &mut UnitOfWork,
    ) -> Result<serde_json::Value, CommandError> {
        let mut enrollment = Enrollment {
            id: AggregateId::new(),
            ..Default::default()
        };
        enrollment.record(Enrolled {
            campaign_id: "spring".into(),
        });
        uow.register_new(&mut enrollment, "enrollments")?;
        Ok(serde_json::Value::Null)
    }
}

fn factory() -> UnitOfWorkFactory {
    let registry =
        RepositoryRegistry::new().with("enrollments", Arc::new(InMemoryRepository::new()));
    UnitOfWorkFactory::new(Arc::new(registry), Arc::new(InMemoryEventPublisher::new()))
}

fn bench_unit_of_work_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let factory = factory();

    c.bench_function("domain/uow_commit_10_ops", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut uow = factory.begin(&MessageMetadata::new());
                for _ in 0..10 {
                    let mut enrollment = Enrollment {
                        id: AggregateId::new(),
                        ..Default::default()
                    };
                    enrollment.record(Enrolled {
                        campaign_id: "spring".into(),
                    });
                    uow.register_new(&mut enrollment, "enrollments").unwrap();
                }
                uow.commit().await.unwrap();
            });
        });
    });
}

fn bench_command_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut bus = CommandBus::new(factory());
    bus.register_handler("Enroll", Arc::new(EnrollHandler))
        .unwrap();

    c.bench_function("domain/command_dispatch", |b| {
        b.iter(|| {
            rt.block_on(async {
                let command =
                    Command::with_metadata(Enroll, MessageMetadata::new().with_user(SYSTEM_USER));
                let result = bus.dispatch(&command).await;
                assert!(result.success);
            });
        });
    });
}

criterion_group!(benches, bench_unit_of_work_commit, bench_command_dispatch);
criterion_main!(benches);

//! `ledgerline projections ...`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledgerline_budget::domain::events::personal_data_schema;
use ledgerline_budget::projections::{CategoryListProjection, MemberDirectoryProjection};
use ledgerline_core::crypto::FieldEncryptor;
use ledgerline_core::error::DomainError;
use ledgerline_core::projection::{
    ProjectionManager, ProjectionStatus, ReplayOptions, ReplayReport,
};
use ledgerline_event_store::pg_event_repository::PgEventRepository;
use ledgerline_event_store::pg_key_manager::PgKeyManager;
use sqlx::PgPool;

use crate::cli::{ProjectionCommands, Target};
use crate::config::Config;
use crate::error::AppError;
use crate::output;

/// Builds the manager with every read model of the budget context.
///
/// # Errors
///
/// Returns `AppError::Domain` if the personal data schema or the
/// registration is invalid.
pub fn build_manager(pool: &PgPool) -> Result<ProjectionManager, AppError> {
    let mut manager = ProjectionManager::new(
        Arc::new(PgEventRepository::new(pool.clone())),
        Arc::new(PgKeyManager::new(pool.clone())),
        FieldEncryptor::new(personal_data_schema()?),
    );
    manager.register(Arc::new(CategoryListProjection::new(pool.clone())))?;
    manager.register(Arc::new(MemberDirectoryProjection::new(pool.clone())))?;
    Ok(manager)
}

/// Runs a projection subcommand and prints its result.
///
/// # Errors
///
/// Returns the engine error of the failing step.
pub async fn run(
    manager: &ProjectionManager,
    config: &Config,
    command: ProjectionCommands,
) -> Result<(), AppError> {
    match command {
        ProjectionCommands::Replay {
            target,
            from_date,
            after_position,
            reset_first,
            batch_size,
        } => {
            let options = replay_options(
                config,
                from_date,
                after_position,
                reset_first,
                batch_size,
            );
            let reports = replay(manager, &target, &options).await?;
            println!("{}", output::report_table(&reports));
        }
        ProjectionCommands::Reset { target } => {
            let names = reset(manager, &target).await?;
            println!("Reset: {}", names.join(", "));
        }
        ProjectionCommands::Status => {
            println!("{}", output::status_table(&status(manager).await?));
        }
    }
    Ok(())
}

/// Combines replay flags with the configured batch size.
#[must_use]
pub fn replay_options(
    config: &Config,
    from_date: Option<DateTime<Utc>>,
    after_position: i64,
    reset_first: bool,
    batch_size: Option<usize>,
) -> ReplayOptions {
    ReplayOptions {
        from_date,
        after_position,
        reset_first,
        batch_size: batch_size.unwrap_or(config.batch_size),
    }
}

/// One replay still owed after a failed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resume {
    /// Projection to replay by name.
    pub projection: String,
    /// Position to resume after; 0 for a projection that never ran.
    pub after_position: i64,
}

impl Resume {
    /// The command an operator runs to carry out this step.
    #[must_use]
    pub fn command(&self) -> String {
        if self.after_position == 0 {
            format!("ledgerline projections replay {}", self.projection)
        } else {
            format!(
                "ledgerline projections replay {} --after-position {}",
                self.projection, self.after_position
            )
        }
    }
}

/// What is left to replay after `failed` stopped at `offset`: the failing
/// projection from its offset, then, for `--all`, every projection
/// registered after it from the start.
#[must_use]
pub fn resume_plan(
    manager: &ProjectionManager,
    target: &Target,
    failed: &str,
    offset: i64,
) -> Vec<Resume> {
    let mut plan = vec![Resume {
        projection: failed.to_owned(),
        after_position: offset,
    }];
    if target.all {
        plan.extend(
            manager
                .names()
                .into_iter()
                .skip_while(|&name| name != failed)
                .skip(1)
                .map(|name| Resume {
                    projection: name.to_owned(),
                    after_position: 0,
                }),
        );
    }
    plan
}

/// Replays the targeted projections.
///
/// # Errors
///
/// Returns `DomainError::ReplayBatchFailure` (logged together with the
/// commands that finish the job) or any other replay error.
pub async fn replay(
    manager: &ProjectionManager,
    target: &Target,
    options: &ReplayOptions,
) -> Result<Vec<ReplayReport>, AppError> {
    let result = match target.name.as_deref() {
        Some(name) if !target.all => manager.replay(name, options).await.map(|r| vec![r]),
        _ => manager.replay_all(options).await,
    };
    result.map_err(|err| {
        if let DomainError::ReplayBatchFailure {
            projection,
            batch,
            offset,
            ..
        } = &err
        {
            tracing::error!(projection = %projection, batch, offset, "replay stopped");
            for step in resume_plan(manager, target, projection, *offset) {
                tracing::error!(command = %step.command(), "to resume, run");
            }
        }
        AppError::from(err)
    })
}

/// Empties the targeted read models and returns their names.
///
/// # Errors
///
/// Returns `DomainError::Validation` for an unknown name, or the truncation
/// error.
pub async fn reset(manager: &ProjectionManager, target: &Target) -> Result<Vec<String>, AppError> {
    match target.name.as_deref() {
        Some(name) if !target.all => {
            manager.reset(name).await?;
            Ok(vec![name.to_owned()])
        }
        _ => {
            manager.reset_all().await?;
            Ok(manager.names().into_iter().map(str::to_owned).collect())
        }
    }
}

/// Status of every registered read model.
///
/// # Errors
///
/// Returns the first storage error.
pub async fn status(manager: &ProjectionManager) -> Result<Vec<ProjectionStatus>, AppError> {
    Ok(manager.status_all().await?)
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use ledgerline_budget::application::command_handlers::handle_create_category;
    use ledgerline_budget::domain::commands::CreateCategory;
    use ledgerline_budget::domain::events::{CATEGORY_CREATED, MEMBER_REGISTERED};
    use ledgerline_core::clock::SystemClock;
    use ledgerline_core::crypto::PersonalDataSchema;
    use ledgerline_core::projection::Projection;
    use ledgerline_core::store::AggregateStore;
    use ledgerline_test_support::{InMemoryEventStore, InMemoryKeyManager, InMemoryProjection};
    use uuid::Uuid;

    use super::*;
    use crate::cli::Cli;

    const CATEGORIES: &[&str] = &[CATEGORY_CREATED];
    const MEMBERS: &[&str] = &[MEMBER_REGISTERED];

    struct Fixture {
        manager: ProjectionManager,
        categories: Arc<InMemoryProjection>,
        second: Arc<InMemoryProjection>,
    }

    async fn fixture(categories: InMemoryProjection, created: usize) -> Fixture {
        fixture_with(
            categories,
            InMemoryProjection::new("members", MEMBERS),
            created,
        )
        .await
    }

    async fn fixture_with(
        categories: InMemoryProjection,
        second: InMemoryProjection,
        created: usize,
    ) -> Fixture {
        let events = Arc::new(InMemoryEventStore::new());
        {
            let clock = SystemClock;
            let store = AggregateStore::new(events.as_ref(), &clock);
            let owner_id = Uuid::new_v4();
            for n in 0..created {
                handle_create_category(
                    &CreateCategory {
                        request_id: Uuid::new_v4(),
                        category_id: Uuid::new_v4(),
                        owner_id,
                        name: format!("Category {n}"),
                        group: None,
                    },
                    &store,
                )
                .await
                .unwrap();
            }
        }

        let categories = Arc::new(categories);
        let second = Arc::new(second);
        let mut manager = ProjectionManager::new(
            events,
            Arc::new(InMemoryKeyManager::new()),
            FieldEncryptor::new(PersonalDataSchema::new(&[]).unwrap()),
        );
        manager.register(Arc::clone(&categories) as Arc<dyn Projection>).unwrap();
        manager.register(Arc::clone(&second) as Arc<dyn Projection>).unwrap();
        Fixture {
            manager,
            categories,
            second,
        }
    }

    fn named(name: &str) -> Target {
        Target {
            name: Some(name.to_owned()),
            all: false,
        }
    }

    fn all() -> Target {
        Target {
            name: None,
            all: true,
        }
    }

    fn config() -> Config {
        Cli::try_parse_from(["ledgerline", "--database-url", "postgres://x/y", "migrate"])
            .unwrap()
            .config
    }

    #[tokio::test]
    async fn test_replay_all_reports_every_projection() {
        // Arrange
        let fixture = fixture(InMemoryProjection::new("categories", CATEGORIES), 3).await;

        // Act
        let reports = replay(&fixture.manager, &all(), &ReplayOptions::default())
            .await
            .unwrap();

        // Assert
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].projection, "categories");
        assert_eq!(reports[0].applied, 3);
        assert_eq!(reports[1].projection, "members");
        assert_eq!(reports[1].applied, 0);
        assert_eq!(fixture.categories.rows().len(), 3);
    }

    #[tokio::test]
    async fn test_replay_unknown_projection_exits_with_1() {
        let fixture = fixture(InMemoryProjection::new("categories", CATEGORIES), 0).await;

        let err = replay(&fixture.manager, &named("nope"), &ReplayOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_exits_with_4_and_reports_resume_point() {
        // Arrange
        let fixture = fixture(
            InMemoryProjection::new("categories", CATEGORIES).failing_on_batch(2),
            4,
        )
        .await;
        let options = ReplayOptions {
            batch_size: 2,
            ..ReplayOptions::default()
        };

        // Act
        let err = replay(&fixture.manager, &named("categories"), &options)
            .await
            .unwrap_err();

        // Assert
        assert_eq!(err.exit_code(), 4);
        assert!(matches!(
            err,
            AppError::Domain(DomainError::ReplayBatchFailure { batch: 2, .. })
        ));
        assert_eq!(fixture.categories.rows().len(), 2);
    }

    #[tokio::test]
    async fn test_following_the_resume_plan_after_replay_all_fails_completes_every_projection() {
        // Arrange
        let fixture = fixture_with(
            InMemoryProjection::new("categories", CATEGORIES).failing_on_batch(2),
            InMemoryProjection::new("category_audit", CATEGORIES),
            4,
        )
        .await;
        let options = ReplayOptions {
            batch_size: 2,
            ..ReplayOptions::default()
        };
        let err = replay(&fixture.manager, &all(), &options)
            .await
            .unwrap_err();
        let (projection, offset) = match err {
            AppError::Domain(DomainError::ReplayBatchFailure {
                projection, offset, ..
            }) => (projection, offset),
            other => panic!("expected ReplayBatchFailure, got {other:?}"),
        };

        // Act
        let plan = resume_plan(&fixture.manager, &all(), &projection, offset);
        for step in &plan {
            let resumed = ReplayOptions {
                after_position: step.after_position,
                ..options
            };
            replay(&fixture.manager, &named(&step.projection), &resumed)
                .await
                .unwrap();
        }

        // Assert
        assert_eq!(
            plan,
            vec![
                Resume {
                    projection: "categories".into(),
                    after_position: offset,
                },
                Resume {
                    projection: "category_audit".into(),
                    after_position: 0,
                },
            ]
        );
        assert!(offset > 0);
        assert_eq!(
            plan[0].command(),
            format!("ledgerline projections replay categories --after-position {offset}")
        );
        assert_eq!(plan[1].command(), "ledgerline projections replay category_audit");
        assert_eq!(fixture.categories.rows().len(), 4);
        assert_eq!(fixture.second.rows().len(), 4);
    }

    #[tokio::test]
    async fn test_resume_plan_for_named_target_is_that_projection_only() {
        let fixture = fixture(InMemoryProjection::new("categories", CATEGORIES), 0).await;

        let plan = resume_plan(&fixture.manager, &named("categories"), "categories", 7);

        assert_eq!(
            plan,
            vec![Resume {
                projection: "categories".into(),
                after_position: 7,
            }]
        );
    }

    #[tokio::test]
    async fn test_reset_named_empties_only_that_projection() {
        let fixture = fixture(InMemoryProjection::new("categories", CATEGORIES), 2).await;
        replay(&fixture.manager, &all(), &ReplayOptions::default())
            .await
            .unwrap();

        let names = reset(&fixture.manager, &named("categories")).await.unwrap();

        assert_eq!(names, vec!["categories".to_owned()]);
        assert!(fixture.categories.rows().is_empty());
    }

    #[tokio::test]
    async fn test_reset_all_names_every_projection() {
        let fixture = fixture(InMemoryProjection::new("categories", CATEGORIES), 1).await;

        let names = reset(&fixture.manager, &all()).await.unwrap();

        assert_eq!(names, vec!["categories".to_owned(), "members".to_owned()]);
    }

    #[tokio::test]
    async fn test_status_lists_projections_in_registration_order() {
        let fixture = fixture(InMemoryProjection::new("categories", CATEGORIES), 2).await;
        replay(&fixture.manager, &all(), &ReplayOptions::default())
            .await
            .unwrap();

        let statuses = status(&fixture.manager).await.unwrap();

        assert_eq!(
            statuses.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["categories", "members"]
        );
        assert_eq!(statuses[0].rows, 2);
        assert_eq!(statuses[1].rows, 0);
    }

    #[test]
    fn test_replay_options_fall_back_to_configured_batch_size() {
        let config = config();

        let defaulted = replay_options(&config, None, 0, false, None);
        let overridden = replay_options(&config, None, 10, true, Some(25));

        assert_eq!(defaulted.batch_size, config.batch_size);
        assert_eq!(overridden.batch_size, 25);
        assert_eq!(overridden.after_position, 10);
        assert!(overridden.reset_first);
    }
}

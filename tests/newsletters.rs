mod support;

use std::net::{IpAddr, Ipv4Addr};

use apalis::prelude::Data;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use quire::application::admin::emails::{AdminEmailError, EmailCommand};
use quire::application::admin::posts::{CreatePostCommand, UpdateDraftCommand};
use quire::application::admin::subscribers::{AdminSubscriberError, MAX_IMPORT_BATCH};
use quire::application::jobs::{
    JobWorkerContext, SendNewsletterEmailJobPayload, process_send_newsletter_email_job,
};
use quire::application::repos::{EmailStatusChange, EmailsRepo, SubscribersRepo};
use quire::application::subscriptions::{SubscribeOutcome, SubscriptionError};
use quire::application::webhooks::{WebhookEvent, WebhookOutcome};
use quire::domain::api_keys::ApiScope;
use quire::domain::posts::PostAction;
use quire::domain::entities::{EmailRecord, NewsletterRecord, PageRecord, SubscriberRecord};
use quire::domain::types::{DeliveryStatus, EmailStatus, JobType, SubscriberStatus};

use support::{ACTOR, PUBLIC_BASE_URL, TestApp, TestLimits, Tenant};

fn ip(last: u8) -> Option<IpAddr> {
    Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, last)))
}

struct Fixture {
    tenant: Tenant,
    page: PageRecord,
    newsletter: NewsletterRecord,
}

async fn fixture(app: &TestApp, double_opt_in: bool) -> Fixture {
    let tenant = app.workspace("Field Notes", &[ApiScope::WorkspaceAdmin]).await;
    let page = app.page(&tenant, "Field Notes").await;
    let newsletter = app.newsletter(&tenant, &page, double_opt_in).await;
    Fixture {
        tenant,
        page,
        newsletter,
    }
}

async fn subscriber(app: &TestApp, newsletter: &NewsletterRecord, email: &str) -> SubscriberRecord {
    app.repos
        .find_subscriber_by_email(newsletter.id, email)
        .await
        .expect("lookup subscriber")
        .expect("subscriber exists")
}

async fn import(app: &TestApp, fx: &Fixture, emails: &[&str]) {
    let report = app
        .api()
        .subscribers
        .import(
            ACTOR,
            fx.tenant.workspace.id,
            fx.page.id,
            fx.newsletter.id,
            emails.iter().map(|email| email.to_string()).collect(),
        )
        .await
        .expect("import subscribers");
    assert_eq!(report.imported, emails.len() as u64);
}

async fn draft_email(app: &TestApp, fx: &Fixture, subject: &str) -> EmailRecord {
    app.api()
        .emails
        .create(
            ACTOR,
            fx.tenant.workspace.id,
            fx.page.id,
            fx.newsletter.id,
            EmailCommand {
                subject: subject.to_string(),
                body_html: "<p>Hello there</p><script>alert(1)</script>".to_string(),
            },
        )
        .await
        .expect("create email")
}

async fn send_now(app: &TestApp, fx: &Fixture, email: &EmailRecord) -> EmailRecord {
    app.api()
        .emails
        .send(
            ACTOR,
            fx.tenant.workspace.id,
            fx.page.id,
            fx.newsletter.id,
            email.id,
            None,
        )
        .await
        .expect("send email")
}

async fn reload(app: &TestApp, email: &EmailRecord) -> EmailRecord {
    app.repos
        .find_email_by_id(email.id)
        .await
        .expect("load email")
        .expect("email exists")
}

#[sqlx::test(migrations = "./migrations")]
async fn double_opt_in_confirms_then_unsubscribes(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, true).await;
    let subscriptions = &app.public().subscriptions;

    let outcome = subscriptions
        .subscribe(&fx.page.slug, &fx.newsletter.slug, "  Reader@Example.com ", ip(1))
        .await
        .expect("subscribe");
    assert_eq!(outcome, SubscribeOutcome::ConfirmationSent);

    let pending = subscriber(&app, &fx.newsletter, "reader@example.com").await;
    assert_eq!(pending.status, SubscriberStatus::Pending);
    assert_eq!(pending.source, "public");

    let mail = app.provider.sent_to("reader@example.com").await;
    assert_eq!(mail.len(), 1);
    assert!(mail[0].subject.contains("Weekly Notes"));
    assert!(mail[0].html_body.contains(&format!(
        "{PUBLIC_BASE_URL}/subscriptions/confirm/{}",
        pending.confirmation_token
    )));

    // A repeat request keeps the row and resends the link.
    subscriptions
        .subscribe(&fx.page.slug, &fx.newsletter.slug, "reader@example.com", ip(1))
        .await
        .expect("repeat subscribe");
    assert_eq!(app.provider.sent_to("reader@example.com").await.len(), 2);
    let still = subscriber(&app, &fx.newsletter, "reader@example.com").await;
    assert_eq!(still.id, pending.id);

    let view = subscriptions
        .confirm(&pending.confirmation_token)
        .await
        .expect("confirm");
    assert_eq!(view.status, SubscriberStatus::Confirmed);
    assert_eq!(view.newsletter, "Weekly Notes");

    let again = subscriptions
        .confirm(&pending.confirmation_token)
        .await
        .expect("confirm twice");
    assert_eq!(again.status, SubscriberStatus::Confirmed);

    let gone = subscriptions
        .unsubscribe(&pending.unsubscribe_token)
        .await
        .expect("unsubscribe");
    assert_eq!(gone.status, SubscriberStatus::Unsubscribed);

    let err = subscriptions
        .confirm(&pending.confirmation_token)
        .await
        .expect_err("confirm after unsubscribe");
    assert!(matches!(err, SubscriptionError::NotPending));

    // Coming back issues fresh tokens and starts over as pending.
    subscriptions
        .subscribe(&fx.page.slug, &fx.newsletter.slug, "reader@example.com", ip(1))
        .await
        .expect("resubscribe");
    let back = subscriber(&app, &fx.newsletter, "reader@example.com").await;
    assert_eq!(back.id, pending.id);
    assert_eq!(back.status, SubscriberStatus::Pending);
    assert_ne!(back.confirmation_token, pending.confirmation_token);

    let err = subscriptions
        .unsubscribe(&pending.unsubscribe_token)
        .await
        .expect_err("stale unsubscribe token");
    assert!(matches!(err, SubscriptionError::TokenNotFound));
}

#[sqlx::test(migrations = "./migrations")]
async fn single_opt_in_confirms_immediately(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, false).await;
    let subscriptions = &app.public().subscriptions;

    for _ in 0..2 {
        let outcome = subscriptions
            .subscribe(&fx.page.slug, &fx.newsletter.slug, "direct@example.com", ip(2))
            .await
            .expect("subscribe");
        assert_eq!(outcome, SubscribeOutcome::Subscribed);
    }

    let record = subscriber(&app, &fx.newsletter, "direct@example.com").await;
    assert_eq!(record.status, SubscriberStatus::Confirmed);
    assert!(record.confirmed_at.is_some());
    assert!(app.provider.sent().await.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn subscribe_rejects_bad_input(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, true).await;
    let subscriptions = &app.public().subscriptions;

    let err = subscriptions
        .subscribe(&fx.page.slug, &fx.newsletter.slug, "not-an-address", ip(3))
        .await
        .expect_err("malformed address");
    assert!(matches!(err, SubscriptionError::InvalidEmail));

    let err = subscriptions
        .subscribe(&fx.page.slug, "missing", "reader@example.com", ip(3))
        .await
        .expect_err("unknown newsletter");
    assert!(matches!(err, SubscriptionError::NewsletterNotFound));

    let err = subscriptions
        .confirm("no-such-token")
        .await
        .expect_err("unknown token");
    assert!(matches!(err, SubscriptionError::TokenNotFound));
}

#[sqlx::test(migrations = "./migrations")]
async fn subscribe_attempts_are_rate_limited(pool: PgPool) {
    let app = TestApp::with_limits(
        pool,
        TestLimits {
            subscribe_per_ip: 2,
            subscribe_per_email: 3,
            ..TestLimits::default()
        },
    );
    let fx = fixture(&app, false).await;
    let subscriptions = &app.public().subscriptions;
    let (page, list) = (fx.page.slug.as_str(), fx.newsletter.slug.as_str());

    subscriptions
        .subscribe(page, list, "one@example.com", ip(10))
        .await
        .expect("first");
    subscriptions
        .subscribe(page, list, "two@example.com", ip(10))
        .await
        .expect("second");
    let err = subscriptions
        .subscribe(page, list, "three@example.com", ip(10))
        .await
        .expect_err("third from the same address");
    match err {
        SubscriptionError::RateLimited { retry_after } => {
            assert!(retry_after.as_secs() > 0);
        }
        other => panic!("expected rate limit, got {other:?}"),
    }

    // Other clients are unaffected, but one address cannot be hammered.
    for last in 20..23 {
        subscriptions
            .subscribe(page, list, "target@example.com", ip(last))
            .await
            .expect("distinct clients");
    }
    let err = subscriptions
        .subscribe(page, list, "target@example.com", ip(30))
        .await
        .expect_err("per-address limit");
    assert!(matches!(err, SubscriptionError::RateLimited { .. }));
}

#[sqlx::test(migrations = "./migrations")]
async fn admin_import_skips_duplicates_and_reports_invalid(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, true).await;
    let service = &app.api().subscribers;
    let (ws, page, list) = (fx.tenant.workspace.id, fx.page.id, fx.newsletter.id);

    service
        .add(ACTOR, ws, page, list, "first@example.com")
        .await
        .expect("add subscriber");

    let report = service
        .import(
            ACTOR,
            ws,
            page,
            list,
            vec![
                "second@example.com".to_string(),
                "Second@Example.com".to_string(),
                "first@example.com".to_string(),
                "broken".to_string(),
                "third@example.com".to_string(),
            ],
        )
        .await
        .expect("import");
    assert_eq!(report.imported, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.invalid, vec!["broken".to_string()]);

    let counts = service.counts(ws, page, list).await.expect("counts");
    assert_eq!(counts.confirmed, 3);
    assert_eq!(counts.pending, 0);

    let err = service
        .add(ACTOR, ws, page, list, "FIRST@example.com")
        .await
        .expect_err("duplicate add");
    assert!(matches!(err, AdminSubscriberError::AlreadySubscribed(email) if email == "first@example.com"));

    let oversized = vec!["bulk@example.com".to_string(); MAX_IMPORT_BATCH + 1];
    let err = service
        .import(ACTOR, ws, page, list, oversized)
        .await
        .expect_err("oversized import");
    assert!(matches!(err, AdminSubscriberError::ImportTooLarge { .. }));

    let other = app.workspace("Elsewhere", &[ApiScope::WorkspaceAdmin]).await;
    let err = service
        .counts(other.workspace.id, page, list)
        .await
        .expect_err("foreign workspace");
    assert!(matches!(err, AdminSubscriberError::NewsletterNotFound));
}

#[sqlx::test(migrations = "./migrations")]
async fn sending_requires_confirmed_recipients_and_future_schedule(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, true).await;
    let email = draft_email(&app, &fx, "Issue #1").await;
    assert_eq!(email.status, EmailStatus::Draft);
    assert!(!email.body_html.contains("script"));

    let emails = &app.api().emails;
    let (ws, page, list) = (fx.tenant.workspace.id, fx.page.id, fx.newsletter.id);

    // Only a pending address: nobody to send to yet.
    app.public()
        .subscriptions
        .subscribe(&fx.page.slug, &fx.newsletter.slug, "pending@example.com", ip(4))
        .await
        .expect("pending subscriber");
    let err = emails
        .send(ACTOR, ws, page, list, email.id, None)
        .await
        .expect_err("no recipients");
    assert!(matches!(err, AdminEmailError::NoRecipients));

    let err = emails
        .send(
            ACTOR,
            ws,
            page,
            list,
            email.id,
            Some(OffsetDateTime::now_utc() - Duration::minutes(5)),
        )
        .await
        .expect_err("past schedule");
    assert!(matches!(err, AdminEmailError::ConstraintViolation("scheduled_at")));
    assert!(app.jobs.queued_of(JobType::SendNewsletterEmail).await.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn delivery_fans_out_in_batches_and_resumes(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, true).await;
    import(&app, &fx, &["a@example.com", "b@example.com", "c@example.com"]).await;
    app.public()
        .subscriptions
        .subscribe(&fx.page.slug, &fx.newsletter.slug, "pending@example.com", ip(5))
        .await
        .expect("pending subscriber");

    let email = draft_email(&app, &fx, "Issue #2").await;
    let sending = send_now(&app, &fx, &email).await;
    assert_eq!(sending.status, EmailStatus::Sending);

    let queued = app.jobs.queued_of(JobType::SendNewsletterEmail).await;
    assert_eq!(queued.len(), 1);
    assert!(queued[0].run_at.is_none());
    let payload: SendNewsletterEmailJobPayload =
        serde_json::from_value(queued[0].payload.clone()).expect("payload");
    assert_eq!(payload.email_id, email.id);
    assert_eq!(payload.generation, sending.send_generation);

    let context = JobWorkerContext {
        posts: app.api().posts.clone(),
        delivery: app.delivery.clone(),
    };
    process_send_newsletter_email_job(payload, Data::new(context))
        .await
        .expect("delivery job");

    let sent = reload(&app, &email).await;
    assert_eq!(sent.status, EmailStatus::Sent);
    assert!(sent.sent_at.is_some());
    assert_eq!(sent.recipient_count, 3);

    for address in ["a@example.com", "b@example.com", "c@example.com"] {
        let mail = app.provider.sent_to(address).await;
        assert_eq!(mail.len(), 1, "{address}");
        assert_eq!(mail[0].subject, "Issue #2");
        assert!(mail[0].html_body.contains("/subscriptions/unsubscribe/"));
        assert!(!mail[0].html_body.contains("script"));
    }
    // Only the confirmation went to the pending address.
    assert_eq!(app.provider.sent_to("pending@example.com").await.len(), 1);

    // A finished issue is left alone.
    let idle = app
        .delivery
        .deliver(email.id, sending.send_generation)
        .await
        .expect("idle pass");
    assert_eq!((idle.sent, idle.skipped), (0, 0));
    assert_eq!(idle.status, EmailStatus::Sent);

    // A worker that died mid-send picks up without mailing anyone twice.
    app.repos
        .update_email_status(EmailStatusChange {
            id: email.id,
            status: EmailStatus::Sending,
            scheduled_at: None,
            sent_at: None,
            last_error: None,
        })
        .await
        .expect("reset to sending");
    let resumed = app
        .delivery
        .deliver(email.id, sending.send_generation)
        .await
        .expect("resume");
    assert_eq!(resumed.sent, 0);
    assert_eq!(resumed.skipped, 3);
    assert_eq!(resumed.status, EmailStatus::Sent);
    assert_eq!(app.provider.sent_to("a@example.com").await.len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn provider_failures_mark_the_issue_and_allow_resend(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, false).await;
    import(&app, &fx, &["a@example.com", "b@example.com", "gone@example.com"]).await;
    let email = draft_email(&app, &fx, "Issue #3").await;

    app.provider.fail_batches(true);
    let first = send_now(&app, &fx, &email).await;
    let report = app
        .delivery
        .deliver(email.id, first.send_generation)
        .await
        .expect("failed pass");
    assert_eq!(report.status, EmailStatus::Failed);
    assert_eq!(report.sent, 0);

    let failed = reload(&app, &email).await;
    assert_eq!(failed.status, EmailStatus::Failed);
    assert!(failed.last_error.as_deref().is_some_and(|err| err.contains("provider unavailable")));

    app.provider.fail_batches(false);
    app.provider.reject("gone@example.com").await;
    let retry = send_now(&app, &fx, &failed).await;
    assert_eq!(retry.send_generation, first.send_generation + 1);
    let report = app
        .delivery
        .deliver(email.id, retry.send_generation)
        .await
        .expect("second pass");
    assert_eq!(report.status, EmailStatus::Sent);
    assert_eq!(report.sent, 2);
    assert_eq!(report.failed, 1);

    let done = reload(&app, &email).await;
    assert_eq!(done.recipient_count, 2);
    assert!(done.last_error.is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_workers_mail_each_subscriber_once(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, false).await;
    let addresses = [
        "a@example.com",
        "b@example.com",
        "c@example.com",
        "d@example.com",
        "e@example.com",
        "f@example.com",
    ];
    import(&app, &fx, &addresses).await;
    let email = draft_email(&app, &fx, "Issue #6").await;
    let sending = send_now(&app, &fx, &email).await;

    let (left, right) = tokio::join!(
        app.delivery.deliver(email.id, sending.send_generation),
        app.delivery.deliver(email.id, sending.send_generation),
    );
    let (left, right) = (left.expect("left worker"), right.expect("right worker"));
    assert_eq!(left.sent + right.sent, 6);
    assert_eq!(left.failed + right.failed, 0);

    assert_eq!(app.provider.sent().await.len(), 6);
    for address in addresses {
        assert_eq!(app.provider.sent_to(address).await.len(), 1, "{address}");
    }

    let done = reload(&app, &email).await;
    assert_eq!(done.status, EmailStatus::Sent);
    assert_eq!(done.recipient_count, 6);

    // A duplicate of the same job has nothing left to claim.
    let again = app
        .delivery
        .deliver(email.id, sending.send_generation)
        .await
        .expect("duplicate job");
    assert_eq!(again.sent, 0);
    assert_eq!(reload(&app, &email).await.recipient_count, 6);
}

#[sqlx::test(migrations = "./migrations")]
async fn jobs_of_an_earlier_send_are_ignored(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, false).await;
    import(&app, &fx, &["a@example.com", "b@example.com"]).await;
    let email = draft_email(&app, &fx, "Issue #7").await;
    let (ws, page, list) = (fx.tenant.workspace.id, fx.page.id, fx.newsletter.id);

    let scheduled = app
        .api()
        .emails
        .send(
            ACTOR,
            ws,
            page,
            list,
            email.id,
            Some(OffsetDateTime::now_utc() + Duration::hours(1)),
        )
        .await
        .expect("schedule");

    // Sending now supersedes the schedule, and that send fails.
    let now = send_now(&app, &fx, &scheduled).await;
    assert!(now.send_generation > scheduled.send_generation);
    app.provider.fail_batches(true);
    let report = app
        .delivery
        .deliver(email.id, now.send_generation)
        .await
        .expect("failing send");
    assert_eq!(report.status, EmailStatus::Failed);
    app.provider.fail_batches(false);

    let queued = app.jobs.queued_of(JobType::SendNewsletterEmail).await;
    assert_eq!(queued.len(), 2);
    let first: SendNewsletterEmailJobPayload =
        serde_json::from_value(queued[0].payload.clone()).expect("payload");
    assert_eq!(first.generation, scheduled.send_generation);

    // The scheduled job fires later and must not resurrect the failed issue.
    let stale = app
        .delivery
        .deliver(first.email_id, first.generation)
        .await
        .expect("stale job");
    assert_eq!(stale.sent, 0);
    assert_eq!(stale.status, EmailStatus::Failed);
    assert!(app.provider.sent().await.is_empty());

    let failed = reload(&app, &email).await;
    assert_eq!(failed.status, EmailStatus::Failed);
    assert_eq!(failed.recipient_count, 0);
    assert!(failed.last_error.is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn send_is_rolled_back_when_the_job_cannot_be_queued(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, false).await;
    import(&app, &fx, &["a@example.com"]).await;
    let email = draft_email(&app, &fx, "Issue #8").await;
    let emails = &app.api().emails;
    let (ws, page, list) = (fx.tenant.workspace.id, fx.page.id, fx.newsletter.id);

    app.jobs.fail_enqueue(true);
    let err = emails
        .send(ACTOR, ws, page, list, email.id, None)
        .await
        .expect_err("queue unavailable");
    assert!(matches!(err, AdminEmailError::Repo(_)));

    let restored = reload(&app, &email).await;
    assert_eq!(restored.status, EmailStatus::Draft);
    assert_eq!(restored.send_generation, email.send_generation);
    assert!(restored.sent_at.is_none());

    app.jobs.fail_enqueue(false);
    let sending = send_now(&app, &fx, &restored).await;
    assert_eq!(sending.status, EmailStatus::Sending);
    assert_eq!(app.jobs.queued_of(JobType::SendNewsletterEmail).await.len(), 1);

    // A scheduled issue keeps its schedule if rescheduling cannot be queued.
    let other = draft_email(&app, &fx, "Issue #9").await;
    let at = OffsetDateTime::now_utc() + Duration::hours(2);
    emails
        .send(ACTOR, ws, page, list, other.id, Some(at))
        .await
        .expect("schedule");
    app.jobs.fail_enqueue(true);
    emails
        .send(ACTOR, ws, page, list, other.id, None)
        .await
        .expect_err("queue unavailable");
    let kept = reload(&app, &other).await;
    assert_eq!(kept.status, EmailStatus::Scheduled);
    assert!(kept.scheduled_at.is_some());

    app.jobs.fail_enqueue(false);
    emails
        .unschedule(ACTOR, ws, page, list, other.id)
        .await
        .expect("unschedule");
    emails
        .delete(ACTOR, ws, page, list, other.id)
        .await
        .expect("delete restored draft");
}

#[sqlx::test(migrations = "./migrations")]
async fn scheduled_issue_waits_and_can_be_unscheduled(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, false).await;
    import(&app, &fx, &["a@example.com"]).await;
    let email = draft_email(&app, &fx, "Issue #4").await;
    let emails = &app.api().emails;
    let (ws, page, list) = (fx.tenant.workspace.id, fx.page.id, fx.newsletter.id);

    let at = OffsetDateTime::now_utc() + Duration::hours(1);
    let scheduled = emails
        .send(ACTOR, ws, page, list, email.id, Some(at))
        .await
        .expect("schedule");
    assert_eq!(scheduled.status, EmailStatus::Scheduled);
    assert!(scheduled.scheduled_at.is_some());
    let queued = app.jobs.queued_of(JobType::SendNewsletterEmail).await;
    assert_eq!(queued.len(), 1);
    assert!(queued[0].run_at.is_some());

    let early = app
        .delivery
        .deliver(email.id, scheduled.send_generation)
        .await
        .expect("early pass");
    assert_eq!(early.status, EmailStatus::Scheduled);
    assert!(app.provider.sent().await.is_empty());

    let edited = emails
        .update(
            ACTOR,
            ws,
            page,
            list,
            email.id,
            EmailCommand {
                subject: "Issue #4, revised".to_string(),
                body_html: "<p>Revised</p>".to_string(),
            },
        )
        .await
        .expect("scheduled issues stay editable");
    assert_eq!(edited.status, EmailStatus::Scheduled);

    let draft = emails
        .unschedule(ACTOR, ws, page, list, email.id)
        .await
        .expect("unschedule");
    assert_eq!(draft.status, EmailStatus::Draft);
    assert!(draft.scheduled_at.is_none());

    // The job still fires later but finds nothing to do.
    let stale = app
        .delivery
        .deliver(email.id, scheduled.send_generation)
        .await
        .expect("stale job");
    assert_eq!(stale.status, EmailStatus::Draft);
    assert!(app.provider.sent().await.is_empty());

    let err = emails
        .unschedule(ACTOR, ws, page, list, email.id)
        .await
        .expect_err("draft cannot be unscheduled");
    assert!(matches!(err, AdminEmailError::NotEditable { status: "draft" }));

    emails
        .delete(ACTOR, ws, page, list, email.id)
        .await
        .expect("delete draft");
    let err = emails
        .get(ws, page, list, email.id)
        .await
        .expect_err("deleted");
    assert!(matches!(err, AdminEmailError::NotFound));
}

#[sqlx::test(migrations = "./migrations")]
async fn webhooks_fold_into_counters_and_suppress(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, false).await;
    import(&app, &fx, &["a@example.com", "b@example.com"]).await;
    let email = draft_email(&app, &fx, "Issue #5").await;
    let sending = send_now(&app, &fx, &email).await;
    app.delivery
        .deliver(email.id, sending.send_generation)
        .await
        .expect("deliver");

    let first = app
        .repos
        .find_delivery_by_message_id("msg-1")
        .await
        .expect("lookup")
        .expect("first delivery");
    let second = app
        .repos
        .find_delivery_by_message_id("msg-2")
        .await
        .expect("lookup")
        .expect("second delivery");
    assert_eq!(first.status, DeliveryStatus::Sent);

    let webhooks = &app.public().webhooks;
    let event = |record: &str, id: &str| {
        WebhookEvent::parse(
            serde_json::json!({ "RecordType": record, "MessageID": id })
                .to_string()
                .as_bytes(),
        )
        .expect("parse event")
    };

    assert_eq!(
        webhooks.handle(event("Delivery", "msg-1")).await.expect("delivery"),
        WebhookOutcome::Applied
    );
    assert_eq!(
        webhooks.handle(event("Delivery", "msg-1")).await.expect("redelivery"),
        WebhookOutcome::Duplicate
    );
    assert_eq!(
        webhooks.handle(event("Open", "msg-1")).await.expect("open"),
        WebhookOutcome::Applied
    );
    assert_eq!(
        webhooks.handle(event("Open", "msg-1")).await.expect("reopen"),
        WebhookOutcome::Duplicate
    );
    // A click implies an open.
    assert_eq!(
        webhooks.handle(event("Click", "msg-2")).await.expect("click"),
        WebhookOutcome::Applied
    );
    assert_eq!(
        webhooks.handle(event("Open", "msg-unknown")).await.expect("unknown"),
        WebhookOutcome::Ignored
    );
    assert_eq!(
        webhooks
            .handle(event("InboundMessage", "msg-1"))
            .await
            .expect("unsupported"),
        WebhookOutcome::Ignored
    );

    let bounce = WebhookEvent::parse(
        serde_json::json!({
            "RecordType": "Bounce",
            "MessageID": "msg-1",
            "Type": "HardBounce",
            "Inactive": true,
            "Description": "mailbox does not exist"
        })
        .to_string()
        .as_bytes(),
    )
    .expect("parse bounce");
    assert_eq!(
        webhooks.handle(bounce.clone()).await.expect("bounce"),
        WebhookOutcome::Applied
    );
    assert_eq!(
        webhooks.handle(bounce).await.expect("rebounce"),
        WebhookOutcome::Duplicate
    );
    assert_eq!(
        webhooks.handle(event("SpamComplaint", "msg-2")).await.expect("complaint"),
        WebhookOutcome::Applied
    );

    let counters = reload(&app, &email).await;
    assert_eq!(counters.delivered_count, 1);
    assert_eq!(counters.opened_count, 2);
    assert_eq!(counters.clicked_count, 1);
    assert_eq!(counters.bounced_count, 1);
    assert_eq!(counters.complained_count, 1);

    let bounced = subscriber(&app, &fx.newsletter, &first.recipient).await;
    assert_eq!(bounced.status, SubscriberStatus::Bounced);
    let complained = subscriber(&app, &fx.newsletter, &second.recipient).await;
    assert_eq!(complained.status, SubscriberStatus::Complained);

    let err = app
        .public()
        .subscriptions
        .subscribe(&fx.page.slug, &fx.newsletter.slug, &first.recipient, ip(6))
        .await
        .expect_err("suppressed address");
    assert!(matches!(err, SubscriptionError::Suppressed));

    let delivery = app
        .repos
        .find_delivery_by_message_id("msg-1")
        .await
        .expect("lookup")
        .expect("delivery");
    assert_eq!(delivery.status, DeliveryStatus::Bounced);
    assert!(delivery.opened_at.is_some());
    assert_eq!(delivery.error.as_deref(), Some("mailbox does not exist"));
}

#[sqlx::test(migrations = "./migrations")]
async fn issues_can_be_drafted_from_published_posts(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, false).await;
    let (ws, page, list) = (fx.tenant.workspace.id, fx.page.id, fx.newsletter.id);
    let posts = &app.api().posts;
    let emails = &app.api().emails;

    let post = posts
        .create_post(
            ACTOR,
            ws,
            CreatePostCommand {
                page_id: page,
                title: "Spring Dispatch".to_string(),
                slug: None,
                excerpt: None,
                body_html: "<p>Buds</p><script>alert(1)</script>".to_string(),
                category_ids: Vec::new(),
                author_ids: Vec::new(),
            },
        )
        .await
        .expect("create post");

    let err = emails
        .create_from_post(ACTOR, ws, page, list, post.id)
        .await
        .expect_err("draft post");
    assert!(matches!(err, AdminEmailError::PostNotPublished));

    let err = emails
        .create_from_post(ACTOR, ws, page, list, uuid::Uuid::new_v4())
        .await
        .expect_err("unknown post");
    assert!(matches!(err, AdminEmailError::PostNotFound));

    posts
        .change_status(ACTOR, ws, page, post.id, PostAction::Publish)
        .await
        .expect("publish");
    // Later draft edits stay out of the issue until republished.
    posts
        .update_draft(
            ACTOR,
            ws,
            UpdateDraftCommand {
                page_id: page,
                id: post.id,
                title: "Spring Dispatch, draft".to_string(),
                slug: post.slug.clone(),
                excerpt: None,
                body_html: "<p>Unreleased</p>".to_string(),
            },
        )
        .await
        .expect("edit draft");

    let email = emails
        .create_from_post(ACTOR, ws, page, list, post.id)
        .await
        .expect("issue from post");
    assert_eq!(email.status, EmailStatus::Draft);
    assert_eq!(email.post_id, Some(post.id));
    assert_eq!(email.subject, "Spring Dispatch");
    assert!(email.body_html.contains("Buds"));
    assert!(!email.body_html.contains("script"));
    assert!(!email.body_html.contains("Unreleased"));

    posts
        .change_status(ACTOR, ws, page, post.id, PostAction::Unpublish)
        .await
        .expect("unpublish");
    let err = emails
        .create_from_post(ACTOR, ws, page, list, post.id)
        .await
        .expect_err("unpublished post");
    assert!(matches!(err, AdminEmailError::PostNotPublished));
}

#[sqlx::test(migrations = "./migrations")]
async fn provider_suppression_unsubscribes_the_recipient(pool: PgPool) {
    let app = TestApp::new(pool);
    let fx = fixture(&app, false).await;
    import(&app, &fx, &["a@example.com", "b@example.com"]).await;
    let email = draft_email(&app, &fx, "Issue #10").await;
    let sending = send_now(&app, &fx, &email).await;
    app.delivery
        .deliver(email.id, sending.send_generation)
        .await
        .expect("deliver");

    let suppressed = app
        .repos
        .find_delivery_by_message_id("msg-1")
        .await
        .expect("lookup")
        .expect("first delivery");
    let kept = app
        .repos
        .find_delivery_by_message_id("msg-2")
        .await
        .expect("lookup")
        .expect("second delivery");

    let webhooks = &app.public().webhooks;
    let change = |id: &str, suppress: bool| {
        WebhookEvent::parse(
            serde_json::json!({
                "RecordType": "SubscriptionChange",
                "MessageID": id,
                "SuppressSending": suppress
            })
            .to_string()
            .as_bytes(),
        )
        .expect("parse subscription change")
    };

    assert_eq!(
        webhooks.handle(change("msg-1", true)).await.expect("suppress"),
        WebhookOutcome::Applied
    );
    assert_eq!(
        webhooks.handle(change("msg-1", true)).await.expect("resuppress"),
        WebhookOutcome::Duplicate
    );
    assert_eq!(
        webhooks.handle(change("msg-2", false)).await.expect("reactivate"),
        WebhookOutcome::Ignored
    );

    let gone = subscriber(&app, &fx.newsletter, &suppressed.recipient).await;
    assert_eq!(gone.status, SubscriberStatus::Unsubscribed);
    assert!(gone.unsubscribed_at.is_some());
    let still = subscriber(&app, &fx.newsletter, &kept.recipient).await;
    assert_eq!(still.status, SubscriberStatus::Confirmed);

    let next = draft_email(&app, &fx, "Issue #11").await;
    let sending = send_now(&app, &fx, &next).await;
    let report = app
        .delivery
        .deliver(next.id, sending.send_generation)
        .await
        .expect("next issue");
    assert_eq!(report.sent, 1);
    let mail = app.provider.sent_to(&suppressed.recipient).await;
    assert_eq!(mail.len(), 1);
}

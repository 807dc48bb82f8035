use std::sync::Arc;
use std::time::Duration;

use intake_core::{JobId, JobStatus, NotificationMessage, NOTIFICATION_QUEUE};
use intake_notify::{Dispatcher, JobEvent, NotificationHandler, StatusService, SubscriberHub};
use intake_queue::{
    dead_letter_queue_name, ConsumeOptions, Consumer, MemoryBroker, MemoryConnector, PublishOptions,
    QueueHandle,
};
use intake_storage::{JobStore, MemoryJobStore};
use tokio::sync::broadcast::error::TryRecvError;

struct Relay {
    broker: Arc<MemoryBroker>,
    handle: QueueHandle,
    hub: SubscriberHub,
    consumer: Consumer,
}

async fn relay() -> Relay {
    let broker = MemoryBroker::new();
    let handle = QueueHandle::spawn(
        Arc::new(MemoryConnector::new(broker.clone())),
        Duration::from_secs(5),
    );
    let hub = SubscriberHub::new(16);
    let dispatcher = Arc::new(Dispatcher::new(vec![Arc::new(hub.clone())]));
    let consumer = Consumer::new(
        handle.clone(),
        NOTIFICATION_QUEUE,
        Arc::new(NotificationHandler::new(dispatcher)),
        ConsumeOptions::default(),
    );
    consumer.declare().await.unwrap();
    Relay {
        broker,
        handle,
        hub,
        consumer,
    }
}

async fn publish(relay: &Relay, body: &str) {
    relay
        .handle
        .publish(NOTIFICATION_QUEUE, body, PublishOptions::persistent())
        .await
        .unwrap();
}

#[tokio::test]
async fn subscriber_gets_exactly_one_event_per_outcome() {
    let relay = relay().await;
    let mut subscriber = relay.hub.subscribe();

    let body = NotificationMessage::JobCompleted { job_id: JobId(7) }.to_json().unwrap();
    publish(&relay, &body).await;
    publish(&relay, &body).await;
    while relay.consumer.run_once().await.unwrap() > 0 {}

    assert_eq!(
        subscriber.recv().await.unwrap(),
        JobEvent::from(NotificationMessage::JobCompleted { job_id: JobId(7) })
    );
    assert!(matches!(subscriber.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(relay.broker.depth(NOTIFICATION_QUEUE), 0);
}

#[tokio::test]
async fn failures_are_pushed_too() {
    let relay = relay().await;
    let mut subscriber = relay.hub.subscribe();

    publish(&relay, r#"{"type":"jobFailed","jobId":3}"#).await;
    relay.consumer.run_once().await.unwrap();

    let event = subscriber.recv().await.unwrap();
    assert_eq!(event.status(), JobStatus::Failed);
    assert_eq!(event.event_name(), "jobFailed");
}

#[tokio::test]
async fn late_subscriber_falls_back_to_polling() {
    let relay = relay().await;
    let jobs = Arc::new(MemoryJobStore::new());
    let job = jobs.create_job("/up/a.csv").await.unwrap();
    jobs.update_status(job.id, JobStatus::Processing).await.unwrap();
    jobs.update_status(job.id, JobStatus::Completed).await.unwrap();

    let body = NotificationMessage::JobCompleted { job_id: job.id }.to_json().unwrap();
    publish(&relay, &body).await;
    relay.consumer.run_once().await.unwrap();

    let mut late = relay.hub.subscribe();
    assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));

    let status = StatusService::new(jobs);
    assert_eq!(status.get_job_status(job.id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn unknown_notification_type_is_dead_lettered() {
    let relay = relay().await;
    let mut subscriber = relay.hub.subscribe();

    publish(&relay, r#"{"type":"jobExploded","jobId":1}"#).await;
    relay.consumer.run_once().await.unwrap();

    assert!(matches!(subscriber.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(relay.broker.depth(&dead_letter_queue_name(NOTIFICATION_QUEUE)), 1);
}

use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

const WEBHOOK_SECRET: &str = "whsec_http_test";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserResponse {
    id: String,
    plan: String,
}

#[derive(Debug, Deserialize)]
struct HabitResponse {
    id: String,
    streak: u32,
}

#[derive(Debug, Deserialize)]
struct Progress {
    completed: usize,
    total: usize,
    percentage: u32,
}

#[derive(Debug, Deserialize)]
struct HabitList {
    habits: Vec<HabitResponse>,
    progress: Progress,
}

struct TestServer {
    base_url: String,
    child: Child,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static SERVER: Lazy<Mutex<Option<Arc<TestServer>>>> = Lazy::new(|| Mutex::new(None));
static EMAILS: AtomicUsize = AtomicUsize::new(0);

#[cfg(unix)]
mod cleanup {
    use std::sync::Once;
    use std::sync::atomic::{AtomicI32, Ordering};

    static REGISTER: Once = Once::new();
    static PID: AtomicI32 = AtomicI32::new(0);

    pub fn register(pid: u32) {
        REGISTER.call_once(|| {
            PID.store(pid as i32, Ordering::SeqCst);
            unsafe {
                libc::atexit(on_exit);
            }
        });
    }

    extern "C" fn on_exit() {
        let pid = PID.load(Ordering::SeqCst);
        if pid > 0 {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
    }
}

fn pick_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn unique_data_dir() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("habitflow_http_{}_{}", std::process::id(), nanos));
    path.to_string_lossy().to_string()
}

fn unique_email() -> String {
    let n = EMAILS.fetch_add(1, Ordering::SeqCst);
    format!("user{n}@example.com")
}

async fn wait_until_ready(base_url: &str) {
    let client = Client::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(resp) = client.get(format!("{base_url}/api/health")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!("server did not become ready");
        }
        sleep(Duration::from_millis(100)).await;
    }
}

async fn spawn_server() -> TestServer {
    let port = pick_free_port();
    let child = Command::new(env!("CARGO_BIN_EXE_habitflow"))
        .env("PORT", port.to_string())
        .env("APP_DATA_PATH", unique_data_dir())
        .env("STRIPE_WEBHOOK_SECRET", WEBHOOK_SECRET)
        .env_remove("STRIPE_SECRET_KEY")
        .env_remove("STRIPE_PRO_PRODUCT_ID")
        .env_remove("STRIPE_PREMIUM_PRODUCT_ID")
        .env("RUST_LOG", "info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn server");

    #[cfg(unix)]
    cleanup::register(child.id());

    let base_url = format!("http://127.0.0.1:{port}");
    wait_until_ready(&base_url).await;

    TestServer { base_url, child }
}

async fn shared_server() -> Arc<TestServer> {
    let mut guard = SERVER.lock().await;
    if let Some(server) = guard.as_ref() {
        return Arc::clone(server);
    }
    let server = Arc::new(spawn_server().await);
    *guard = Some(Arc::clone(&server));
    server
}

async fn signup(client: &Client, base_url: &str) -> UserResponse {
    let response = client
        .post(format!("{base_url}/api/signup"))
        .json(&json!({ "name": "Ada", "email": unique_email(), "password": "hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    response.json().await.unwrap()
}

#[tokio::test]
async fn http_health_reports_unconfigured_billing() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;

    let health: Value = Client::new()
        .get(format!("{}/api/health", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health["status"], "ok");
    assert_eq!(health["stripeConfigured"], false);
    assert_eq!(health["prices"], json!({}));
    assert!(health["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn http_toggle_habit_updates_streak_and_progress() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();
    let user = signup(&client, &server.base_url).await;
    assert_eq!(user.plan, "free");

    let habits_url = format!("{}/api/users/{}/habits", server.base_url, user.id);
    let habit: HabitResponse = client
        .post(&habits_url)
        .json(&json!({ "title": "Read" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(habit.streak, 0);

    let response = client
        .post(format!("{habits_url}/{}/toggle", habit.id))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let toggled: HabitResponse = response.json().await.unwrap();
    assert_eq!(toggled.streak, 1);

    let list: HabitList = client
        .get(&habits_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.habits.len(), 1);
    assert_eq!(list.habits[0].streak, 1);
    assert_eq!(
        (list.progress.completed, list.progress.total, list.progress.percentage),
        (1, 1, 100)
    );
}

#[tokio::test]
async fn http_free_plan_rejects_sixth_habit() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();
    let user = signup(&client, &server.base_url).await;
    let habits_url = format!("{}/api/users/{}/habits", server.base_url, user.id);

    for n in 0..5 {
        let response = client
            .post(&habits_url)
            .json(&json!({ "title": format!("habit {n}") }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = client
        .post(&habits_url)
        .json(&json!({ "title": "one too many" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["error"],
        "You've reached the limit of 5 habits. Upgrade your plan for more!"
    );

    let list: HabitList = client
        .get(&habits_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.habits.len(), 5);
}

#[tokio::test]
async fn http_webhook_rejects_bad_signatures() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();
    let url = format!("{}/api/webhook", server.base_url);
    let body = r#"{"id":"evt_1","created":1700000000,"type":"charge.refunded","data":{"object":{}}}"#;

    let missing = client.post(&url).body(body).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let forged = client
        .post(&url)
        .header("stripe-signature", "t=1700000000,v1=deadbeef")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::BAD_REQUEST);
    let error: Value = forged.json().await.unwrap();
    assert!(error["error"].as_str().unwrap().starts_with("Webhook Error:"));
}

#[tokio::test]
async fn http_unknown_user_is_not_found() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;

    let response = Client::new()
        .get(format!("{}/api/users/nobody/tasks", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "User not found: nobody");
}

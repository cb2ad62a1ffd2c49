use page_analytics::auth::{sign_jwt_for_admin, sign_jwt_for_user};

use super::app::TestApp;

pub fn admin_token(app: &TestApp) -> String {
    sign_jwt_for_admin("admin-1", &app.config.admin_jwt_secret, 1).expect("sign admin token")
}

pub fn admin_headers(app: &TestApp) -> Vec<(&'static str, String)> {
    vec![("authorization", format!("Bearer {}", admin_token(app)))]
}

pub fn visitor_headers(app: &TestApp, roles: &[&str]) -> Vec<(&'static str, String)> {
    let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
    let token = sign_jwt_for_user("visitor-1", &roles, &app.config.jwt_secret, 1)
        .expect("sign visitor token");
    vec![("cookie", format!("token={token}"))]
}

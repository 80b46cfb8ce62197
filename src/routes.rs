use actix_web::web;

use crate::handlers;

// Configure API routes under /api/v1
pub fn configure_api_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(handlers::upload_handlers::upload_document)
        .service(handlers::job_handlers::list_jobs)
        .service(handlers::job_handlers::get_job_status)
        .service(handlers::job_handlers::get_job_page)
        .service(handlers::job_handlers::update_job_title)
        .service(handlers::job_handlers::retry_job)
        .service(handlers::feedback_handlers::submit_feedback)
        .service(handlers::feedback_handlers::pending_feedback)
        .service(handlers::job_handlers::get_job)
        .service(handlers::job_handlers::delete_job)
        .service(handlers::dashboard_handlers::dashboard_stats)
        .service(handlers::feedback_handlers::list_models);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_compile() {
        let _ = actix_web::App::new().configure(configure_api_routes);
    }
}

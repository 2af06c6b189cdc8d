//! Project command handlers.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use zori_core::models::{CreateProjectRequest, Project, UpdateProjectRequest};
use zori_core::projects::ProjectsApi;
use zori_core::{ApiError, ErrorContext, validation};

use super::{Context, api_failure, check};

fn api(ctx: &Context) -> Result<ProjectsApi> {
    ctx.require_login()?;
    Ok(ProjectsApi::new(Arc::clone(&ctx.client)))
}

fn failure(err: &ApiError) -> anyhow::Error {
    api_failure(err, ErrorContext::General)
}

pub async fn list(ctx: &Context, json: bool) -> Result<()> {
    let list = api(ctx)?.list().await.map_err(|e| failure(&e))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&list).context("encode projects")?
        );
        return Ok(());
    }

    if list.projects.is_empty() {
        println!("No projects found.");
        return Ok(());
    }

    let id_width = list.projects.iter().map(|p| p.id.len()).max().unwrap_or(0);
    let name_width = list.projects.iter().map(|p| p.name.len()).max().unwrap_or(0);
    for project in &list.projects {
        println!(
            "{:<id_width$}  {:<name_width$}  {}",
            project.id,
            project.name,
            project.website_url.as_deref().unwrap_or("-")
        );
    }
    println!();
    println!("{} project(s)", list.total.max(list.projects.len()));
    Ok(())
}

pub async fn show(ctx: &Context, id: &str, json: bool) -> Result<()> {
    let project = api(ctx)?.get(id).await.map_err(|e| failure(&e))?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&project).context("encode project")?
        );
    } else {
        print_project(&project);
    }
    Ok(())
}

pub async fn create(
    ctx: &Context,
    name: String,
    website_url: String,
    allow_localhost: bool,
) -> Result<()> {
    let request = CreateProjectRequest {
        name: name.trim().to_string(),
        website_url: website_url.trim().to_string(),
        allow_localhost,
    };
    check(validation::validate_create_project(&request))?;

    let project = api(ctx)?.create(&request).await.map_err(|e| failure(&e))?;
    println!("✓ Created project {}", project.id);
    print_project(&project);
    Ok(())
}

pub async fn update(
    ctx: &Context,
    id: &str,
    name: Option<String>,
    website_url: Option<String>,
    allow_localhost: Option<bool>,
) -> Result<()> {
    let request = UpdateProjectRequest {
        name: name.map(|n| n.trim().to_string()),
        website_url: website_url.map(|u| u.trim().to_string()),
        allow_localhost,
    };
    if request.name.is_none() && request.website_url.is_none() && request.allow_localhost.is_none()
    {
        anyhow::bail!("Nothing to update. Pass --name, --website-url or --allow-localhost.");
    }
    check(validation::validate_update_project(&request))?;

    let project = api(ctx)?
        .update(id, &request)
        .await
        .map_err(|e| failure(&e))?;
    println!("✓ Updated project {}", project.id);
    print_project(&project);
    Ok(())
}

pub async fn delete(ctx: &Context, id: &str) -> Result<()> {
    let response = api(ctx)?.delete(id).await.map_err(|e| failure(&e))?;
    match response.message {
        Some(message) => println!("✓ {message}"),
        None => println!("✓ Deleted project {id}"),
    }
    Ok(())
}

fn print_project(project: &Project) {
    println!("ID:              {}", project.id);
    println!("Name:            {}", project.name);
    println!(
        "Website:         {}",
        project.website_url.as_deref().unwrap_or("-")
    );
    println!(
        "Allow localhost: {}",
        if project.allow_localhost { "yes" } else { "no" }
    );
    if let Some(status) = &project.status {
        println!("Status:          {status}");
    }
    if let Some(token) = &project.project_token {
        println!("Project token:   {token}");
    }
    if let Some(created_at) = &project.created_at {
        println!("Created:         {created_at}");
    }
}

//! Create command - scaffold a new chart

use console::style;
use rudder_kube::validate_release_name;
use std::fs;
use std::path::Path;

use crate::error::{CliError, Result};

pub fn run(name: &str, output: &Path) -> Result<()> {
    validate_release_name(name).map_err(|e| CliError::usage(e.to_string()))?;
    let chart_dir = output.join(name);

    // Check if directory exists
    if chart_dir.exists() {
        return Err(CliError::usage(format!(
            "Directory {} already exists",
            chart_dir.display()
        )));
    }

    // Create directory structure
    fs::create_dir_all(&chart_dir)?;

    fs::create_dir_all(chart_dir.join("templates"))?;

    // Create Chart.yaml
    let chart_yaml = format!(
        r#"name: {name}
version: 0.1.0
description: A Rudder chart for {name}
appVersion: "1.0.0"
"#
    );

    fs::write(chart_dir.join("Chart.yaml"), chart_yaml)?;

    // Create values.yaml
    let values_yaml = format!(
        r#"# Default values for {name}

replicaCount: 1

image:
  repository: nginx
  tag: "latest"
  pullPolicy: IfNotPresent

service:
  type: ClusterIP
  port: 80

resources: {{}}
  # limits:
  #   cpu: 100m
  #   memory: 128Mi
  # requests:
  #   cpu: 100m
  #   memory: 128Mi
"#
    );

    fs::write(chart_dir.join("values.yaml"), values_yaml)?;

    // Create deployment.yaml template
    let deployment = format!(
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{{{ release.name }}}}-{name}
  labels:
    app.kubernetes.io/name: {name}
    app.kubernetes.io/instance: {{{{ release.name }}}}
    app.kubernetes.io/version: {{{{ chart.appVersion | default("unknown") }}}}
    app.kubernetes.io/managed-by: {{{{ release.service }}}}
spec:
  replicas: {{{{ values.replicaCount }}}}
  selector:
    matchLabels:
      app.kubernetes.io/name: {name}
      app.kubernetes.io/instance: {{{{ release.name }}}}
  template:
    metadata:
      labels:
        app.kubernetes.io/name: {name}
        app.kubernetes.io/instance: {{{{ release.name }}}}
    spec:
      containers:
        - name: {name}
          image: "{{{{ values.image.repository }}}}:{{{{ values.image.tag }}}}"
          imagePullPolicy: {{{{ values.image.pullPolicy }}}}
          ports:
            - name: http
              containerPort: 80
              protocol: TCP
          {{% if values.resources %}}
          resources:
            {{{{ values.resources | toyaml | nindent(12) }}}}
          {{% endif %}}
"#
    );

    fs::write(chart_dir.join("templates/deployment.yaml"), deployment)?;

    // Create service.yaml template
    let service = format!(
        r#"apiVersion: v1
kind: Service
metadata:
  name: {{{{ release.name }}}}-{name}
  labels:
    app.kubernetes.io/name: {name}
    app.kubernetes.io/instance: {{{{ release.name }}}}
spec:
  type: {{{{ values.service.type }}}}
  ports:
    - port: {{{{ values.service.port }}}}
      targetPort: http
      protocol: TCP
      name: http
  selector:
    app.kubernetes.io/name: {name}
    app.kubernetes.io/instance: {{{{ release.name }}}}
"#
    );

    fs::write(chart_dir.join("templates/service.yaml"), service)?;

    // Create NOTES.txt
    let notes = format!(
        r#"Thank you for installing {{{{ chart.name }}}}.

Your release is named: {{{{ release.name }}}}

To reach the application, run:
  kubectl --namespace {{{{ release.namespace }}}} port-forward svc/{{{{ release.name }}}}-{name} {{{{ values.service.port }}}}:{{{{ values.service.port }}}}
  echo "Visit http://127.0.0.1:{{{{ values.service.port }}}}"
"#
    );

    fs::write(chart_dir.join("templates/NOTES.txt"), notes)?;

    println!(
        "{} Created chart {} at {}",
        style("✓").green().bold(),
        style(name).cyan(),
        style(chart_dir.display()).dim()
    );

    println!();
    println!("Next steps:");
    println!(
        "  1. Edit {} to customize your chart",
        style("values.yaml").cyan()
    );
    println!(
        "  2. Edit templates in {}",
        style("templates/").cyan()
    );
    println!(
        "  3. Test with: {} template myrelease {}",
        style("rudder").green(),
        chart_dir.display()
    );

    Ok(())
}

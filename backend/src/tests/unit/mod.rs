mod workflows;
